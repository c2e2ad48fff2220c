//! Type descriptors: a self-describing type tree transmitted (and cached)
//! on the wire, plus the per-type encode/decode strategies that drive
//! marshalling.

use crate::codec::{Decoder, Encoder};
use crate::error::{RuntimeError, RuntimeResult};
use crate::heap::ObjectHeap;
use crate::peer::PeerFunction;
use crate::transport::Transport;
use crate::value::{HeapObject, Value};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Fixed single-byte tags identifying each descriptor variant on the wire.
pub mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const U8: u8 = 2;
    pub const U16: u8 = 3;
    pub const U32: u8 = 4;
    pub const U64: u8 = 5;
    pub const U128: u8 = 6;
    pub const I8: u8 = 7;
    pub const I16: u8 = 8;
    pub const I32: u8 = 9;
    pub const I64: u8 = 10;
    pub const I128: u8 = 11;
    pub const F32: u8 = 12;
    pub const F64: u8 = 13;
    pub const USIZE: u8 = 14;
    pub const ISIZE: u8 = 15;
    pub const STRING: u8 = 16;
    pub const HEAP_REF: u8 = 17;
    pub const CALLBACK: u8 = 18;
    pub const OPTION: u8 = 19;
    pub const RESULT: u8 = 20;
    pub const ARRAY: u8 = 21;
    pub const BORROWED_REF: u8 = 22;
    pub const U8_CLAMPED: u8 = 23;
    pub const STRING_ENUM: u8 = 24;
}

/// Marker introducing a type slot on the wire: a full definition to cache,
/// or a lookup by a previously cached id.
pub mod marker {
    pub const FULL: u8 = 0xFE;
    pub const CACHED: u8 = 0xFF;
}

/// A self-describing, recursively-structured type. Each variant knows how
/// to encode a [`Value`] into an [`Encoder`] and decode one back out of a
/// [`Decoder`]; `decode ∘ encode` is the identity for any value the
/// descriptor is capable of encoding in the first place.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    /// Maps to JS `null`/`undefined`; carries no payload on the wire.
    Null,
    /// `bool`.
    Bool,
    /// Unsigned integers, encoded at their natural width.
    U8,
    U16,
    U32,
    U64,
    U128,
    /// Signed integers, encoded at their natural width.
    I8,
    I16,
    I32,
    I64,
    I128,
    /// Transmitted as 64-bit, unsigned.
    Usize,
    /// Transmitted as 64-bit, signed.
    Isize,
    /// IEEE-754 single precision.
    F32,
    /// IEEE-754 double precision.
    F64,
    /// Length-prefixed UTF-8 string.
    String,
    /// A reference into the allocated heap range.
    HeapRef,
    /// A reference valid for the duration of the enclosing outbound call.
    BorrowedRef,
    /// A native function reference: parameter types, then a return type.
    Callback(Vec<TypeDescriptor>, Box<TypeDescriptor>),
    /// `u8` tag `0` = absent, `1` = present followed by the inner payload.
    Option(Box<TypeDescriptor>),
    /// `u8` tag `1` = ok, `0` = err.
    Result(Box<TypeDescriptor>, Box<TypeDescriptor>),
    /// `u32` length followed by that many encoded elements.
    Array(Box<TypeDescriptor>),
    /// Length-prefixed byte run, decoded to a clamped byte array.
    U8Clamped,
    /// `u32` index into a fixed variant table; an unknown string encodes to
    /// the reserved invalid slot `variants.len()`.
    StringEnum(Vec<String>),
}

/// A cached type slot: the full signature of one dispatch operation
/// (parameter descriptors in call order, plus a return descriptor).
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Parameter descriptors, in call order.
    pub params: Vec<TypeDescriptor>,
    /// Return-value descriptor.
    pub return_type: TypeDescriptor,
}

/// Maps wire `typeId`s to previously-parsed signatures.
#[derive(Debug, Default)]
pub struct TypeCache {
    entries: FxHashMap<u32, Rc<Signature>>,
}

impl TypeCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the type slot at the decoder's current position: a marker byte
    /// from the 8-bit section, a `typeId` from the 32-bit section, and
    /// (for a full definition) the recursive descriptor bytes that follow.
    /// A full definition installs itself into the cache under `typeId`.
    pub fn read_type_slot(&mut self, dec: &mut Decoder<'_>) -> RuntimeResult<Rc<Signature>> {
        let marker_byte = dec.read_u8()?;
        let type_id = dec.read_u32()?;
        match marker_byte {
            marker::FULL => {
                let param_count = dec.read_u8()?;
                let mut params = Vec::with_capacity(param_count as usize);
                for _ in 0..param_count {
                    params.push(parse_descriptor(dec)?);
                }
                let return_type = parse_descriptor(dec)?;
                let sig = Rc::new(Signature { params, return_type });
                self.entries.insert(type_id, sig.clone());
                Ok(sig)
            }
            marker::CACHED => self.entries.get(&type_id).cloned().ok_or_else(|| {
                RuntimeError::ProtocolViolation(format!("unknown cached type id {type_id}"))
            }),
            other => Err(RuntimeError::ProtocolViolation(format!(
                "unknown type marker {other:#x}"
            ))),
        }
    }
}

/// Recursively parse one type descriptor from the decoder's 8-bit stream.
pub fn parse_descriptor(dec: &mut Decoder<'_>) -> RuntimeResult<TypeDescriptor> {
    let t = dec.read_u8()?;
    Ok(match t {
        tag::NULL => TypeDescriptor::Null,
        tag::BOOL => TypeDescriptor::Bool,
        tag::U8 => TypeDescriptor::U8,
        tag::U16 => TypeDescriptor::U16,
        tag::U32 => TypeDescriptor::U32,
        tag::U64 => TypeDescriptor::U64,
        tag::U128 => TypeDescriptor::U128,
        tag::I8 => TypeDescriptor::I8,
        tag::I16 => TypeDescriptor::I16,
        tag::I32 => TypeDescriptor::I32,
        tag::I64 => TypeDescriptor::I64,
        tag::I128 => TypeDescriptor::I128,
        tag::F32 => TypeDescriptor::F32,
        tag::F64 => TypeDescriptor::F64,
        tag::USIZE => TypeDescriptor::Usize,
        tag::ISIZE => TypeDescriptor::Isize,
        tag::STRING => TypeDescriptor::String,
        tag::HEAP_REF => TypeDescriptor::HeapRef,
        tag::BORROWED_REF => TypeDescriptor::BorrowedRef,
        tag::U8_CLAMPED => TypeDescriptor::U8Clamped,
        tag::CALLBACK => {
            let param_count = dec.read_u8()?;
            let mut params = Vec::with_capacity(param_count as usize);
            for _ in 0..param_count {
                params.push(parse_descriptor(dec)?);
            }
            let ret = parse_descriptor(dec)?;
            TypeDescriptor::Callback(params, Box::new(ret))
        }
        tag::OPTION => TypeDescriptor::Option(Box::new(parse_descriptor(dec)?)),
        tag::RESULT => {
            let ok = parse_descriptor(dec)?;
            let err = parse_descriptor(dec)?;
            TypeDescriptor::Result(Box::new(ok), Box::new(err))
        }
        tag::ARRAY => TypeDescriptor::Array(Box::new(parse_descriptor(dec)?)),
        tag::STRING_ENUM => {
            let variant_count = dec.read_u8()?;
            let mut variants = Vec::with_capacity(variant_count as usize);
            for _ in 0..variant_count {
                let len = dec.read_u8()? as usize;
                let bytes = dec.read_byte_run(len)?;
                let s = String::from_utf8(bytes)
                    .map_err(|e| RuntimeError::ProtocolViolation(format!("invalid utf-8: {e}")))?;
                variants.push(s);
            }
            TypeDescriptor::StringEnum(variants)
        }
        other => {
            return Err(RuntimeError::ProtocolViolation(format!(
                "unknown type tag {other}"
            )));
        }
    })
}

impl TypeDescriptor {
    /// Encode `v` according to this descriptor. `HeapRef`/`BorrowedRef`
    /// mutate `heap` (inserting or borrowing) but never write the
    /// resulting id to the wire: the peer re-derives it from its own
    /// synchronized water-mark.
    pub fn encode(&self, enc: &mut Encoder, heap: &mut ObjectHeap, v: &Value) -> RuntimeResult<()> {
        match self {
            TypeDescriptor::Null => Ok(()),
            TypeDescriptor::Bool => {
                let b = v
                    .as_bool()
                    .ok_or_else(|| RuntimeError::ProtocolViolation("expected bool".into()))?;
                enc.push_u8(b as u8);
                Ok(())
            }
            TypeDescriptor::U8 => {
                enc.push_u8(expect_number(v)? as u8);
                Ok(())
            }
            TypeDescriptor::U16 => {
                enc.push_u16(expect_number(v)? as u16);
                Ok(())
            }
            TypeDescriptor::U32 | TypeDescriptor::I32 => {
                enc.push_u32(expect_number(v)? as i64 as u32);
                Ok(())
            }
            TypeDescriptor::I8 => {
                enc.push_u8(expect_number(v)? as i8 as u8);
                Ok(())
            }
            TypeDescriptor::I16 => {
                enc.push_u16(expect_number(v)? as i16 as u16);
                Ok(())
            }
            TypeDescriptor::U64 | TypeDescriptor::Usize => {
                enc.push_u64(expect_big(v)? as u64);
                Ok(())
            }
            TypeDescriptor::I64 | TypeDescriptor::Isize => {
                enc.push_i64(expect_big(v)? as i64);
                Ok(())
            }
            TypeDescriptor::U128 => {
                enc.push_u128(expect_big(v)? as u128);
                Ok(())
            }
            TypeDescriptor::I128 => {
                enc.push_i128(expect_big(v)?);
                Ok(())
            }
            TypeDescriptor::F32 => {
                enc.push_f32(expect_number(v)? as f32);
                Ok(())
            }
            TypeDescriptor::F64 => {
                enc.push_f64(expect_number(v)?);
                Ok(())
            }
            TypeDescriptor::String => {
                let s = v
                    .as_str()
                    .ok_or_else(|| RuntimeError::ProtocolViolation("expected string".into()))?;
                enc.push_string(s);
                Ok(())
            }
            TypeDescriptor::HeapRef => {
                heap.insert(v.clone());
                Ok(())
            }
            TypeDescriptor::BorrowedRef => {
                heap.add_borrowed_ref(v.clone())?;
                Ok(())
            }
            TypeDescriptor::Callback(_, _) => match v {
                Value::Callback(peer) => {
                    enc.push_u64(peer.fn_id() as u64);
                    Ok(())
                }
                _ => Err(RuntimeError::ProtocolViolation("expected callback".into())),
            },
            TypeDescriptor::Option(inner) => match v {
                Value::Null | Value::Undefined => {
                    enc.push_u8(0);
                    Ok(())
                }
                other => {
                    enc.push_u8(1);
                    inner.encode(enc, heap, other)
                }
            },
            TypeDescriptor::Result(ok_ty, err_ty) => {
                let obj = as_object(v)?;
                let obj = obj.borrow();
                if let Some(ok) = obj.properties.get("ok") {
                    enc.push_u8(1);
                    ok_ty.encode(enc, heap, ok)
                } else if let Some(err) = obj.properties.get("err") {
                    enc.push_u8(0);
                    err_ty.encode(enc, heap, err)
                } else {
                    Err(RuntimeError::InvalidResultVariant)
                }
            }
            TypeDescriptor::Array(elem) => match v {
                Value::Array(items) => {
                    enc.push_u32(items.len() as u32);
                    for item in items {
                        elem.encode(enc, heap, item)?;
                    }
                    Ok(())
                }
                _ => Err(RuntimeError::ProtocolViolation("expected array".into())),
            },
            TypeDescriptor::U8Clamped => match v {
                Value::U8Clamped(bytes) => {
                    enc.push_u32(bytes.len() as u32);
                    for b in bytes {
                        enc.push_u8(*b);
                    }
                    Ok(())
                }
                _ => Err(RuntimeError::ProtocolViolation("expected u8 clamped array".into())),
            },
            TypeDescriptor::StringEnum(variants) => {
                let s = v
                    .as_str()
                    .ok_or_else(|| RuntimeError::ProtocolViolation("expected string enum".into()))?;
                let idx = variants
                    .iter()
                    .position(|variant| variant == s)
                    .unwrap_or(variants.len());
                enc.push_u32(idx as u32);
                Ok(())
            }
        }
    }

    /// Decode a value according to this descriptor. `transport` is only
    /// consulted by `Callback`, to build a peer-function wrapper capable of
    /// calling back into native code later.
    pub fn decode(
        &self,
        dec: &mut Decoder<'_>,
        heap: &mut ObjectHeap,
        transport: &Rc<dyn Transport>,
    ) -> RuntimeResult<Value> {
        Ok(match self {
            TypeDescriptor::Null => Value::Null,
            TypeDescriptor::Bool => Value::Bool(dec.read_u8()? != 0),
            TypeDescriptor::U8 => Value::Number(dec.read_u8()? as f64),
            TypeDescriptor::U16 => Value::Number(dec.read_u16()? as f64),
            TypeDescriptor::U32 => Value::Number(dec.read_u32()? as f64),
            TypeDescriptor::I8 => Value::Number(dec.read_u8()? as i8 as f64),
            TypeDescriptor::I16 => Value::Number(dec.read_u16()? as i16 as f64),
            TypeDescriptor::I32 => Value::Number(dec.read_u32()? as i32 as f64),
            TypeDescriptor::U64 => Value::BigInt(dec.read_u64()? as i128),
            TypeDescriptor::I64 => Value::BigInt(dec.read_i64()? as i128),
            TypeDescriptor::U128 => Value::BigInt(dec.read_u128()? as i128),
            TypeDescriptor::I128 => Value::BigInt(dec.read_i128()?),
            TypeDescriptor::Usize => Value::BigInt(dec.read_u64()? as i128),
            TypeDescriptor::Isize => Value::BigInt(dec.read_i64()? as i128),
            TypeDescriptor::F32 => Value::Number(dec.read_f32()? as f64),
            TypeDescriptor::F64 => Value::Number(dec.read_f64()?),
            TypeDescriptor::String => Value::String(dec.read_string()?.into()),
            TypeDescriptor::HeapRef => {
                let id = dec.read_u64()? as u32;
                heap.get(id)?
            }
            TypeDescriptor::BorrowedRef => {
                let id = dec.read_u64()? as u32;
                heap.get(id)?
            }
            TypeDescriptor::Callback(params, ret) => {
                let fn_id = dec.read_u64()? as u32;
                Value::Callback(PeerFunction::new(
                    fn_id,
                    params.clone(),
                    (**ret).clone(),
                    transport.clone(),
                ))
            }
            TypeDescriptor::Option(inner) => match dec.read_u8()? {
                0 => Value::Null,
                1 => inner.decode(dec, heap, transport)?,
                other => {
                    return Err(RuntimeError::ProtocolViolation(format!(
                        "invalid option tag {other}"
                    )));
                }
            },
            TypeDescriptor::Result(ok_ty, err_ty) => {
                let mut obj = HeapObject::default();
                match dec.read_u8()? {
                    1 => {
                        let ok = ok_ty.decode(dec, heap, transport)?;
                        obj.properties.insert("ok".into(), ok);
                    }
                    0 => {
                        let err = err_ty.decode(dec, heap, transport)?;
                        obj.properties.insert("err".into(), err);
                    }
                    other => {
                        return Err(RuntimeError::ProtocolViolation(format!(
                            "invalid result tag {other}"
                        )));
                    }
                }
                Value::Object(Rc::new(RefCell::new(obj)))
            }
            TypeDescriptor::Array(elem) => {
                let len = dec.read_u32()? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(elem.decode(dec, heap, transport)?);
                }
                Value::Array(items)
            }
            TypeDescriptor::U8Clamped => {
                let len = dec.read_u32()? as usize;
                Value::U8Clamped(dec.read_byte_run(len)?)
            }
            TypeDescriptor::StringEnum(variants) => {
                let idx = dec.read_u32()? as usize;
                match variants.get(idx) {
                    Some(s) => Value::String(s.as_str().into()),
                    None => Value::Undefined,
                }
            }
        })
    }
}

fn expect_number(v: &Value) -> RuntimeResult<f64> {
    v.as_number()
        .ok_or_else(|| RuntimeError::ProtocolViolation("expected number".into()))
}

fn expect_big(v: &Value) -> RuntimeResult<i128> {
    match v {
        Value::BigInt(n) => Ok(*n),
        Value::Number(n) => Ok(*n as i128),
        _ => Err(RuntimeError::ProtocolViolation("expected integer".into())),
    }
}

fn as_object(v: &Value) -> RuntimeResult<Rc<RefCell<HeapObject>>> {
    match v {
        Value::Object(o) => Ok(o.clone()),
        _ => Err(RuntimeError::InvalidResultVariant),
    }
}
