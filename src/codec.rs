//! Binary wire codec.
//!
//! A message is four homogeneous streams (32-bit words, 16-bit halves,
//! 8-bit bytes, and UTF-8 string bytes) packed into one buffer behind a
//! 12-byte header giving the byte offsets of the 16-bit, 8-bit and string
//! sections. The 32-bit section starts immediately after the header. Every
//! numeric field is little-endian. This module implements the wire layout
//! without interpreting what the streams mean (that's `crate::types`).

use crate::error::{RuntimeError, RuntimeResult};

const HEADER_LEN: usize = 12;

/// Builds a wire message by accumulating pushes into four independent
/// streams, then packing them into one buffer on [`Encoder::finalize`].
///
/// Pushes may happen in any order relative to each other *across* streams;
/// within a single stream, values come out of the matching `Decoder` in the
/// order they were pushed.
#[derive(Debug, Default)]
pub struct Encoder {
    words: Vec<u8>,
    halves: Vec<u8>,
    bytes: Vec<u8>,
    strings: Vec<u8>,
}

impl Encoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw 32-bit word.
    pub fn push_u32(&mut self, v: u32) {
        self.words.extend_from_slice(&v.to_le_bytes());
    }

    /// Push a raw 16-bit half.
    pub fn push_u16(&mut self, v: u16) {
        self.halves.extend_from_slice(&v.to_le_bytes());
    }

    /// Push a raw byte.
    pub fn push_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    /// Push a signed 64-bit integer as `low:u32, high:u32` two's-complement
    /// halves into the word stream.
    pub fn push_i64(&mut self, v: i64) {
        self.push_u64(v as u64);
    }

    /// Push an unsigned 64-bit integer as `low:u32, high:u32`.
    pub fn push_u64(&mut self, v: u64) {
        self.push_u32(v as u32);
        self.push_u32((v >> 32) as u32);
    }

    /// Push a signed 128-bit integer as two 64-bit halves (four words).
    pub fn push_i128(&mut self, v: i128) {
        self.push_u128(v as u128);
    }

    /// Push an unsigned 128-bit integer as two 64-bit halves.
    pub fn push_u128(&mut self, v: u128) {
        self.push_u64(v as u64);
        self.push_u64((v >> 64) as u64);
    }

    /// Push an IEEE-754 single-precision float as its bit pattern.
    pub fn push_f32(&mut self, v: f32) {
        self.push_u32(v.to_bits());
    }

    /// Push an IEEE-754 double-precision float as its bit pattern.
    pub fn push_f64(&mut self, v: f64) {
        self.push_u64(v.to_bits());
    }

    /// Push a string: a `u32` length into the word stream, followed by the
    /// UTF-8 bytes appended to the string section.
    pub fn push_string(&mut self, s: &str) {
        self.push_u32(s.len() as u32);
        self.strings.extend_from_slice(s.as_bytes());
    }

    /// Materialize the accumulated streams into a single buffer.
    pub fn finalize(self) -> Vec<u8> {
        let u16_offset = HEADER_LEN + self.words.len();
        let u8_offset = u16_offset + self.halves.len();
        let string_offset = u8_offset + self.bytes.len();

        let mut out = Vec::with_capacity(string_offset + self.strings.len());
        out.extend_from_slice(&(u16_offset as u32).to_le_bytes());
        out.extend_from_slice(&(u8_offset as u32).to_le_bytes());
        out.extend_from_slice(&(string_offset as u32).to_le_bytes());
        out.extend_from_slice(&self.words);
        out.extend_from_slice(&self.halves);
        out.extend_from_slice(&self.bytes);
        out.extend_from_slice(&self.strings);
        out
    }
}

/// Reads the four streams of a wire message independently. Reading past a
/// stream's end is a programmer error and surfaces as
/// [`RuntimeError::ProtocolViolation`].
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    word_pos: usize,
    word_end: usize,
    half_pos: usize,
    half_end: usize,
    byte_pos: usize,
    byte_end: usize,
    string_pos: usize,
    string_end: usize,
}

impl<'a> Decoder<'a> {
    /// Parse the 12-byte header and set up the four stream cursors.
    pub fn new(buf: &'a [u8]) -> RuntimeResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(RuntimeError::ProtocolViolation(
                "buffer shorter than the 12-byte header".into(),
            ));
        }
        let u16_offset = read_u32_le(buf, 0)? as usize;
        let u8_offset = read_u32_le(buf, 4)? as usize;
        let string_offset = read_u32_le(buf, 8)? as usize;
        if !(HEADER_LEN <= u16_offset && u16_offset <= u8_offset && u8_offset <= string_offset
            && string_offset <= buf.len())
        {
            return Err(RuntimeError::ProtocolViolation(
                "section offsets out of order or out of bounds".into(),
            ));
        }
        Ok(Self {
            buf,
            word_pos: HEADER_LEN,
            word_end: u16_offset,
            half_pos: u16_offset,
            half_end: u8_offset,
            byte_pos: u8_offset,
            byte_end: string_offset,
            string_pos: string_offset,
            string_end: buf.len(),
        })
    }

    /// Whether the 32-bit word stream has at least one more word.
    pub fn has_more_words(&self) -> bool {
        self.word_pos < self.word_end
    }

    /// Bytes remaining in the 8-bit stream.
    pub fn remaining_bytes(&self) -> usize {
        self.byte_end - self.byte_pos
    }

    /// Skip `n` bytes in the 8-bit stream (used by the type-descriptor
    /// parser to step over a full definition it has already consumed).
    pub fn skip_bytes(&mut self, n: usize) -> RuntimeResult<()> {
        if self.byte_pos + n > self.byte_end {
            return Err(RuntimeError::ProtocolViolation(
                "skip_bytes past end of u8 section".into(),
            ));
        }
        self.byte_pos += n;
        Ok(())
    }

    /// True iff all four streams are fully consumed.
    pub fn is_empty(&self) -> bool {
        self.word_pos == self.word_end
            && self.half_pos == self.half_end
            && self.byte_pos == self.byte_end
            && self.string_pos == self.string_end
    }

    /// Raise [`RuntimeError::LeftoverBytes`] unless every stream is drained.
    pub fn expect_empty(&self) -> RuntimeResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::LeftoverBytes)
        }
    }

    /// Read a raw 32-bit word.
    pub fn read_u32(&mut self) -> RuntimeResult<u32> {
        if self.word_pos + 4 > self.word_end {
            return Err(RuntimeError::ProtocolViolation("word stream exhausted".into()));
        }
        let v = read_u32_le(self.buf, self.word_pos)?;
        self.word_pos += 4;
        Ok(v)
    }

    /// Read a raw 16-bit half.
    pub fn read_u16(&mut self) -> RuntimeResult<u16> {
        if self.half_pos + 2 > self.half_end {
            return Err(RuntimeError::ProtocolViolation("half stream exhausted".into()));
        }
        let bytes = [self.buf[self.half_pos], self.buf[self.half_pos + 1]];
        self.half_pos += 2;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Read a raw byte.
    pub fn read_u8(&mut self) -> RuntimeResult<u8> {
        if self.byte_pos >= self.byte_end {
            return Err(RuntimeError::ProtocolViolation("byte stream exhausted".into()));
        }
        let v = self.buf[self.byte_pos];
        self.byte_pos += 1;
        Ok(v)
    }

    /// Peek the next byte without consuming it.
    pub fn peek_u8(&self) -> RuntimeResult<u8> {
        if self.byte_pos >= self.byte_end {
            return Err(RuntimeError::ProtocolViolation("byte stream exhausted".into()));
        }
        Ok(self.buf[self.byte_pos])
    }

    /// Read a signed 64-bit integer from `low:u32, high:u32`, sign-extending
    /// the high half before reconstructing the value.
    pub fn read_i64(&mut self) -> RuntimeResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Read an unsigned 64-bit integer from `low:u32, high:u32`.
    pub fn read_u64(&mut self) -> RuntimeResult<u64> {
        let low = self.read_u32()? as u64;
        let high = self.read_u32()? as u64;
        Ok((high << 32) | low)
    }

    /// Read a signed 128-bit integer from two 64-bit halves.
    pub fn read_i128(&mut self) -> RuntimeResult<i128> {
        Ok(self.read_u128()? as i128)
    }

    /// Read an unsigned 128-bit integer from two 64-bit halves.
    pub fn read_u128(&mut self) -> RuntimeResult<u128> {
        let low = self.read_u64()? as u128;
        let high = self.read_u64()? as u128;
        Ok((high << 64) | low)
    }

    /// Read an IEEE-754 single-precision float from its bit pattern.
    pub fn read_f32(&mut self) -> RuntimeResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Read an IEEE-754 double-precision float from its bit pattern.
    pub fn read_f64(&mut self) -> RuntimeResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a length-prefixed UTF-8 string: the length comes from the word
    /// stream, the bytes from the string section.
    pub fn read_string(&mut self) -> RuntimeResult<String> {
        let len = self.read_u32()? as usize;
        if self.string_pos + len > self.string_end {
            return Err(RuntimeError::ProtocolViolation(
                "string section exhausted".into(),
            ));
        }
        let bytes = &self.buf[self.string_pos..self.string_pos + len];
        self.string_pos += len;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| RuntimeError::ProtocolViolation(format!("invalid utf-8: {e}")))
    }

    /// Read `len` raw bytes from the 8-bit section (used by `U8Clamped`).
    pub fn read_byte_run(&mut self, len: usize) -> RuntimeResult<Vec<u8>> {
        if self.byte_pos + len > self.byte_end {
            return Err(RuntimeError::ProtocolViolation("byte run exhausted".into()));
        }
        let out = self.buf[self.byte_pos..self.byte_pos + len].to_vec();
        self.byte_pos += len;
        Ok(out)
    }
}

fn read_u32_le(buf: &[u8], at: usize) -> RuntimeResult<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| RuntimeError::ProtocolViolation("truncated header".into()))
}
