//! Wire-level message framing shared by the dispatch loop and the
//! peer-function/peer-object wrappers.

/// First byte of the `u8` section: the peer is handing us work to do.
pub const MSG_EVALUATE: u8 = 0;
/// First byte of the `u8` section: the peer is answering work we handed it.
pub const MSG_RESPOND: u8 = 1;

/// Reserved function id: a one-shot `Evaluate` telling the peer that a
/// JS-held wrapper around one of its functions has been dropped. Chosen
/// distinct from [`CALL_EXPORTED_PEER_METHOD`]; see `DESIGN.md`.
pub const DROP_NATIVE_REFERENCE: u32 = 0xFFFF_FFFF;
/// Reserved function id: JS invoking an exported method on a peer object,
/// by `ClassName::method` selector and opaque handle.
pub const CALL_EXPORTED_PEER_METHOD: u32 = 0xFFFF_FFFE;

/// Inner selector carried by an ordinary (non-reserved) `Evaluate`'s first
/// operation: `0` means "call the native function named by `fnId`
/// directly", with no further indirection.
pub const INNER_SELECTOR_CALL_NATIVE: u32 = 0;

/// Build the minimal well-formed `Respond` buffer used to stand in for a
/// transport that returned `None`: an empty, valid reply with nothing left
/// for a caller to consume.
pub fn empty_respond_bytes() -> Vec<u8> {
    let mut enc = crate::codec::Encoder::new();
    enc.push_u8(MSG_RESPOND);
    enc.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decoder;

    #[test]
    fn reserved_ids_are_distinct() {
        assert_ne!(DROP_NATIVE_REFERENCE, CALL_EXPORTED_PEER_METHOD);
    }

    #[test]
    fn empty_respond_decodes_to_a_bare_respond_tag() {
        let buf = empty_respond_bytes();
        let mut dec = Decoder::new(&buf).unwrap();
        assert_eq!(dec.read_u8().unwrap(), MSG_RESPOND);
        assert!(dec.is_empty());
    }
}
