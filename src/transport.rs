//! The two synchronous send endpoints the peer (native/webview host) is
//! reached through.

/// Which of the two conceptual channels a message travels over. Both are
/// synchronous, request/response, and carry an opaque byte buffer; the
/// distinction exists only so a [`Transport`] implementation can route or
/// instrument the two directions differently if it wants to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// JS replying to an `Evaluate` the peer initiated.
    CallbackReply,
    /// JS initiating a call outward to the peer (a peer-function invocation,
    /// an exported-method call, or a finalizer notification).
    Outbound,
}

/// Sends a framed buffer to the peer and (synchronously) returns its reply,
/// or `None` if the transport could not complete the round trip. A `None`
/// is treated identically to an empty, well-formed `Respond`: the runtime
/// does not distinguish "the peer said nothing" from "the send failed".
pub trait Transport {
    /// Deliver `payload` to `endpoint` and return the peer's reply bytes,
    /// if any.
    fn send(&self, endpoint: Endpoint, payload: &[u8]) -> Option<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTransport;
    impl Transport for EchoTransport {
        fn send(&self, _endpoint: Endpoint, payload: &[u8]) -> Option<Vec<u8>> {
            Some(payload.to_vec())
        }
    }

    #[test]
    fn a_transport_can_be_used_as_a_trait_object() {
        let t: Box<dyn Transport> = Box::new(EchoTransport);
        assert_eq!(t.send(Endpoint::Outbound, &[1, 2, 3]), Some(vec![1, 2, 3]));
    }
}
