//! The orchestrator tying the heap, type cache, function registry and
//! transport together, and the re-entrant dispatch loop that drives them.
//!
//! The boundary protocol this runtime implements treats the heap, borrow
//! stack, reservation stack, type cache and registry as global singletons
//! exposed on an ambient host object, since there is only one cooperative
//! thread, one webview, one runtime per process. Rather than translate that
//! literally into Rust statics, this crate gathers the same state into one
//! `Runtime` value and leaves ambient access to whoever embeds it (typically
//! a single `thread_local!` holding the one instance a process needs).

use crate::codec::{Decoder, Encoder};
use crate::config::RuntimeConfig;
use crate::dispatch::{empty_respond_bytes, MSG_EVALUATE, MSG_RESPOND};
use crate::error::{RuntimeError, RuntimeResult};
use crate::heap::ObjectHeap;
use crate::registry::FunctionRegistry;
use crate::transport::{Endpoint, Transport};
use crate::types::{TypeCache, TypeDescriptor};
use crate::value::Value;
use std::rc::Rc;
use tracing::instrument;

/// Owns every piece of ambient state one runtime needs: the heap, the
/// parsed-type-descriptor cache, the registry of callable JS functions, and
/// the transport used to reach the peer.
pub struct Runtime {
    pub(crate) heap: ObjectHeap,
    type_cache: TypeCache,
    registry: Rc<dyn FunctionRegistry>,
    pub(crate) transport: Rc<dyn Transport>,
    config: RuntimeConfig,
    reentry_depth: u32,
}

impl Runtime {
    /// Build a runtime around a registry and a transport.
    pub fn new(
        registry: Rc<dyn FunctionRegistry>,
        transport: Rc<dyn Transport>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            heap: ObjectHeap::new(),
            type_cache: TypeCache::new(),
            registry,
            transport,
            config,
            reentry_depth: 0,
        }
    }

    /// The object heap backing this runtime. Exposed so embedding glue can
    /// hand out [`crate::value::Value::Object`]s ahead of any dispatch.
    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    /// The object heap, mutably.
    pub fn heap_mut(&mut self) -> &mut ObjectHeap {
        &mut self.heap
    }

    /// The entry point the peer calls from outside the boundary: a
    /// base64-encoded buffer in, `()` out, with every failure surfaced as
    /// an error rather than a return value.
    #[instrument(level = "debug", skip(self, input))]
    pub fn handle_base64(&mut self, input: &str) -> RuntimeResult<()> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(input)
            .map_err(|e| RuntimeError::ProtocolViolation(format!("invalid base64: {e}")))?;
        let reply_bytes = self.dispatch(&bytes)?;
        let mut dec = Decoder::new(&reply_bytes)?;
        dec.read_u8()?;
        dec.expect_empty()
    }

    /// Process one message buffer, recursing through the transport for as
    /// long as the peer keeps answering with further `Evaluate`s, and
    /// returning the raw bytes of the terminal `Respond` (tag included,
    /// unconsumed) once one arrives.
    ///
    /// Returning owned bytes rather than a borrowing [`Decoder`] lets this
    /// function recurse freely: each recursive call's reply buffer would
    /// otherwise be a local about to go out of scope just as its decoder
    /// needed to outlive it.
    #[instrument(level = "debug", skip(self, bytes))]
    pub fn dispatch(&mut self, bytes: &[u8]) -> RuntimeResult<Vec<u8>> {
        let mut dec = Decoder::new(bytes)?;
        let msg_type = dec.read_u8()?;
        match msg_type {
            MSG_RESPOND => Ok(bytes.to_vec()),
            MSG_EVALUATE => {
                self.reentry_depth += 1;
                if self.reentry_depth > self.config.max_reentry_depth {
                    self.reentry_depth -= 1;
                    return Err(RuntimeError::ReentryDepthExceeded);
                }
                let result = self.evaluate_batch(&mut dec).and_then(|respond_bytes| {
                    let reply = self
                        .transport
                        .send(Endpoint::CallbackReply, &respond_bytes)
                        .unwrap_or_else(empty_respond_bytes);
                    self.dispatch(&reply)
                });
                self.reentry_depth -= 1;
                result
            }
            other => Err(RuntimeError::ProtocolViolation(format!(
                "unknown message type {other}"
            ))),
        }
    }

    /// Run the body of one `Evaluate` message (everything after the message
    /// type byte) and build the `Respond` buffer answering it.
    fn evaluate_batch(&mut self, dec: &mut Decoder<'_>) -> RuntimeResult<Vec<u8>> {
        let reserved_count = dec.read_u32()?;
        if reserved_count > 0 {
            self.heap.push_reservation_scope(reserved_count);
        }
        let frame = self.heap.push_borrow_frame();

        let mut enc = Encoder::new();
        enc.push_u8(MSG_RESPOND);

        let outcome = self.run_operations(dec, reserved_count, &mut enc);

        self.heap.pop_borrow_frame(frame);
        if reserved_count > 0 {
            self.heap.pop_reservation_scope();
        }
        outcome?;
        Ok(enc.finalize())
    }

    fn run_operations(
        &mut self,
        dec: &mut Decoder<'_>,
        reserved_count: u32,
        enc: &mut Encoder,
    ) -> RuntimeResult<()> {
        while dec.has_more_words() {
            let fn_id = dec.read_u32()?;
            let sig = self.type_cache.read_type_slot(dec)?;
            let mut args = Vec::with_capacity(sig.params.len());
            for param in &sig.params {
                args.push(param.decode(dec, &mut self.heap, &self.transport)?);
            }
            let result = self.invoke_registry(fn_id, args)?;

            let returns_fresh_heap_ref = matches!(sig.return_type, TypeDescriptor::HeapRef);
            if returns_fresh_heap_ref && reserved_count > 0 {
                self.heap.fill_next_reserved(result)?;
            } else {
                sig.return_type.encode(enc, &mut self.heap, &result)?;
            }
        }
        Ok(())
    }

    /// Call into the registry with `self` re-borrowed mutably on the other
    /// side of the trait object. Cloning the `Rc` first (cheap: a pointer
    /// and a refcount bump) drops the borrow of `self.registry` before
    /// `registry.call(self, ...)` needs `self` mutably. Unlike an
    /// `Option::take`, this keeps working no matter how many re-entrant
    /// `Evaluate`s are in flight at once, since there is no shared state to
    /// restore on the way back out.
    fn invoke_registry(&mut self, fn_id: u32, args: Vec<Value>) -> RuntimeResult<Value> {
        let registry = self.registry.clone();
        registry.call(self, fn_id, args)
    }

    /// Build a runtime with a no-op transport and an empty registry, for
    /// tests that only need *a* runtime to satisfy a signature.
    #[cfg(test)]
    pub(crate) fn new_for_test() -> Self {
        struct NullTransport;
        impl Transport for NullTransport {
            fn send(&self, _endpoint: Endpoint, _payload: &[u8]) -> Option<Vec<u8>> {
                None
            }
        }
        Runtime::new(
            Rc::new(crate::registry::VecRegistry::new()),
            Rc::new(NullTransport),
            RuntimeConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VecRegistry;
    use crate::types::{marker, tag};
    use std::cell::RefCell;

    struct ScriptedTransport {
        replies: RefCell<Vec<Vec<u8>>>,
    }
    impl Transport for ScriptedTransport {
        fn send(&self, _endpoint: Endpoint, _payload: &[u8]) -> Option<Vec<u8>> {
            self.replies.borrow_mut().pop()
        }
    }

    fn type_slot_u32_u32_to_u32(type_id: u32) -> impl Fn(&mut Encoder) {
        move |enc: &mut Encoder| {
            enc.push_u8(marker::FULL);
            enc.push_u32(type_id);
            enc.push_u8(2);
            enc.push_u8(tag::U32);
            enc.push_u8(tag::U32);
            enc.push_u8(tag::U32);
        }
    }

    #[test]
    fn simple_call_adds_and_returns_u32() {
        let mut registry = VecRegistry::new();
        registry.register(|_rt, args| {
            let a = args[0].as_number().unwrap();
            let b = args[1].as_number().unwrap();
            Ok(Value::Number(a + b))
        });
        let transport = Rc::new(ScriptedTransport {
            replies: RefCell::new(vec![]),
        });
        let mut rt = Runtime::new(Rc::new(registry), transport, RuntimeConfig::default());

        let mut enc = Encoder::new();
        enc.push_u8(MSG_EVALUATE);
        enc.push_u32(0); // reservedCount
        enc.push_u32(0); // fnId
        type_slot_u32_u32_to_u32(100)(&mut enc);
        enc.push_u32(3);
        enc.push_u32(4);
        let buf = enc.finalize();

        let reply = rt.dispatch(&buf).unwrap();
        let mut dec = Decoder::new(&reply).unwrap();
        assert_eq!(dec.read_u8().unwrap(), MSG_RESPOND);
        assert_eq!(dec.read_u32().unwrap(), 7);
        assert!(dec.is_empty());
    }

    #[test]
    fn cached_type_reuses_the_earlier_full_definition() {
        let mut registry = VecRegistry::new();
        registry.register(|_rt, args| {
            let a = args[0].as_number().unwrap();
            let b = args[1].as_number().unwrap();
            Ok(Value::Number(a + b))
        });
        let transport = Rc::new(ScriptedTransport {
            replies: RefCell::new(vec![]),
        });
        let mut rt = Runtime::new(Rc::new(registry), transport, RuntimeConfig::default());

        let mut first = Encoder::new();
        first.push_u8(MSG_EVALUATE);
        first.push_u32(0);
        first.push_u32(0);
        type_slot_u32_u32_to_u32(100)(&mut first);
        first.push_u32(3);
        first.push_u32(4);
        rt.dispatch(&first.finalize()).unwrap();

        let mut second = Encoder::new();
        second.push_u8(MSG_EVALUATE);
        second.push_u32(0);
        second.push_u32(0);
        second.push_u8(marker::CACHED);
        second.push_u32(100);
        second.push_u32(3);
        second.push_u32(4);
        let reply = rt.dispatch(&second.finalize()).unwrap();
        let mut dec = Decoder::new(&reply).unwrap();
        assert_eq!(dec.read_u8().unwrap(), MSG_RESPOND);
        assert_eq!(dec.read_u32().unwrap(), 7);
        assert!(dec.is_empty());
    }

    #[test]
    fn batch_with_placeholders_fills_reserved_ids_in_order() {
        let mut registry = VecRegistry::new();
        for n in 0..3u32 {
            registry.register(move |rt, _args| Ok(Value::Number((rt.heap.water_mark() + n) as f64)));
        }
        let transport = Rc::new(ScriptedTransport {
            replies: RefCell::new(vec![]),
        });
        let mut rt = Runtime::new(Rc::new(registry), transport, RuntimeConfig::default());
        let water = rt.heap.water_mark();

        let mut enc = Encoder::new();
        enc.push_u8(MSG_EVALUATE);
        enc.push_u32(3); // reservedCount
        for fn_id in 0..3u32 {
            enc.push_u32(fn_id);
            enc.push_u8(marker::FULL);
            enc.push_u32(200 + fn_id);
            enc.push_u8(0);
            enc.push_u8(tag::HEAP_REF);
        }
        let reply = rt.dispatch(&enc.finalize()).unwrap();
        let mut dec = Decoder::new(&reply).unwrap();
        assert_eq!(dec.read_u8().unwrap(), MSG_RESPOND);
        assert!(dec.is_empty(), "HeapRef returns write nothing to the wire");

        for (i, expected_id) in (water..water + 3).enumerate() {
            assert!(rt.heap.has(expected_id), "slot {i} not filled at {expected_id}");
        }
    }

    #[test]
    fn unregistered_function_id_is_a_protocol_violation() {
        let registry = VecRegistry::new();
        let transport = Rc::new(ScriptedTransport {
            replies: RefCell::new(vec![]),
        });
        let mut rt = Runtime::new(Rc::new(registry), transport, RuntimeConfig::default());

        let mut enc = Encoder::new();
        enc.push_u8(MSG_EVALUATE);
        enc.push_u32(0);
        enc.push_u32(0);
        enc.push_u8(marker::FULL);
        enc.push_u32(1);
        enc.push_u8(0);
        enc.push_u8(tag::NULL);
        assert!(matches!(
            rt.dispatch(&enc.finalize()),
            Err(RuntimeError::ProtocolViolation(_))
        ));
    }
}
