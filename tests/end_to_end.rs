//! End-to-end scenarios driving the dispatch loop through a scripted
//! transport: the callback round trip, nested callbacks under a reserved
//! batch, and finalizer notification on drop.

use std::cell::RefCell;
use std::rc::Rc;
use webview_bridge_rt::codec::{Decoder, Encoder};
use webview_bridge_rt::config::RuntimeConfig;
use webview_bridge_rt::dispatch::{DROP_NATIVE_REFERENCE, MSG_EVALUATE, MSG_RESPOND};
use webview_bridge_rt::peer::PeerFunction;
use webview_bridge_rt::registry::VecRegistry;
use webview_bridge_rt::runtime::Runtime;
use webview_bridge_rt::transport::{Endpoint, Transport};
use webview_bridge_rt::types::{marker, tag, TypeDescriptor};
use webview_bridge_rt::value::Value;

fn type_slot(enc: &mut Encoder, type_id: u32, param_tags: &[u8], return_tag: u8) {
    enc.push_u8(marker::FULL);
    enc.push_u32(type_id);
    enc.push_u8(param_tags.len() as u8);
    for t in param_tags {
        enc.push_u8(*t);
    }
    enc.push_u8(return_tag);
}

/// A transport whose replies are scripted in call order, standing in for
/// the native peer across a scenario. Every sent buffer is recorded too, so
/// a scenario can assert on what was actually put on the wire.
struct ScriptedTransport {
    replies: RefCell<Vec<Vec<u8>>>,
    sent: RefCell<Vec<Vec<u8>>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Vec<u8>>) -> Rc<Self> {
        Rc::new(Self {
            replies: RefCell::new(replies),
            sent: RefCell::new(Vec::new()),
        })
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, _endpoint: Endpoint, payload: &[u8]) -> Option<Vec<u8>> {
        self.sent.borrow_mut().push(payload.to_vec());
        if self.replies.borrow().is_empty() {
            None
        } else {
            Some(self.replies.borrow_mut().remove(0))
        }
    }
}

/// Scenario 3: JS registry entry 0 invokes a peer callback `(U32)->U32`
/// with `5`; native replies to that outbound Evaluate with `Respond u32=10`;
/// entry 0 then returns `10+1=11` in the original Respond.
#[test]
fn callback_round_trip_adds_one_to_the_peers_answer() {
    let mut peer_reply = Encoder::new();
    peer_reply.push_u8(MSG_RESPOND);
    peer_reply.push_u32(10);
    let transport = ScriptedTransport::new(vec![peer_reply.finalize()]);

    let mut registry = VecRegistry::new();
    let callback_transport = transport.clone() as Rc<dyn Transport>;
    registry.register(move |rt, args| {
        let _ = &args;
        let callback = PeerFunction::new(
            9,
            vec![TypeDescriptor::U32],
            TypeDescriptor::U32,
            callback_transport.clone(),
        );
        let result = callback.call(rt, vec![Value::Number(5.0)])?;
        Ok(Value::Number(result.as_number().unwrap() + 1.0))
    });

    let mut rt = Runtime::new(
        Rc::new(registry),
        transport.clone() as Rc<dyn Transport>,
        RuntimeConfig::default(),
    );

    let mut enc = Encoder::new();
    enc.push_u8(MSG_EVALUATE);
    enc.push_u32(0);
    enc.push_u32(0); // fnId 0
    type_slot(&mut enc, 300, &[], tag::U32);
    let reply = rt.dispatch(&enc.finalize()).unwrap();
    let mut dec = Decoder::new(&reply).unwrap();
    assert_eq!(dec.read_u8().unwrap(), MSG_RESPOND);
    assert_eq!(dec.read_u32().unwrap(), 11);
    assert!(dec.is_empty());

    // The outbound Evaluate JS built for the callback carried selector 0,
    // fnId 9, and the single u32 argument 5, with no type slot, since JS
    // already knows this callback's signature from construction.
    let sent = transport.sent.borrow();
    let mut outbound = Decoder::new(&sent[0]).unwrap();
    assert_eq!(outbound.read_u8().unwrap(), MSG_EVALUATE);
    assert_eq!(outbound.read_u32().unwrap(), 0);
    assert_eq!(outbound.read_u32().unwrap(), 9);
    assert_eq!(outbound.read_u32().unwrap(), 5);
    assert!(outbound.is_empty());
}

/// Scenario 5: a batch with `reservedCount = 3`; the second operation's
/// implementation calls a peer callback that issues its own nested
/// Evaluate/Respond round trip before returning. The third operation's
/// placeholder id must still land at `W+2` once the inner call settles.
#[test]
fn deep_callback_nesting_preserves_the_third_placeholder() {
    let mut inner_peer_reply = Encoder::new();
    inner_peer_reply.push_u8(MSG_RESPOND);
    inner_peer_reply.push_u32(99);
    let transport = ScriptedTransport::new(vec![inner_peer_reply.finalize()]);

    let mut registry = VecRegistry::new();
    registry.register(|_rt, _args| Ok(Value::Object(Default::default())));
    let callback_transport = transport.clone() as Rc<dyn Transport>;
    registry.register(move |rt, _args| {
        let callback = PeerFunction::new(
            9,
            vec![],
            TypeDescriptor::U32,
            callback_transport.clone(),
        );
        callback.call(rt, vec![])?;
        Ok(Value::Object(Default::default()))
    });
    registry.register(|_rt, _args| Ok(Value::Object(Default::default())));

    let mut rt = Runtime::new(
        Rc::new(registry),
        transport.clone() as Rc<dyn Transport>,
        RuntimeConfig::default(),
    );
    let water = rt.heap().water_mark();

    let mut enc = Encoder::new();
    enc.push_u8(MSG_EVALUATE);
    enc.push_u32(3); // reservedCount
    for fn_id in 0..3u32 {
        enc.push_u32(fn_id);
        type_slot(&mut enc, 400 + fn_id, &[], tag::HEAP_REF);
    }
    let reply = rt.dispatch(&enc.finalize()).unwrap();
    let mut dec = Decoder::new(&reply).unwrap();
    assert_eq!(dec.read_u8().unwrap(), MSG_RESPOND);
    assert!(dec.is_empty());

    assert!(rt.heap().has(water));
    assert!(rt.heap().has(water + 1));
    assert!(rt.heap().has(water + 2));
}

/// Scenario 6: dropping a peer-function wrapper's last strong reference
/// sends a single Evaluate with `fnId = 0xFFFFFFFF` and a u32 payload equal
/// to the original native function id.
#[test]
fn dropping_the_last_reference_notifies_the_peer() {
    let transport = ScriptedTransport::new(vec![]);
    {
        let f = PeerFunction::new(
            42,
            vec![],
            TypeDescriptor::Null,
            transport.clone() as Rc<dyn Transport>,
        );
        let _also_f = f.clone();
        drop(f);
        assert_eq!(
            transport.sent.borrow().len(),
            0,
            "a second strong reference still exists"
        );
    }
    let sent = transport.sent.borrow();
    assert_eq!(sent.len(), 1);
    let mut dec = Decoder::new(&sent[0]).unwrap();
    assert_eq!(dec.read_u8().unwrap(), MSG_EVALUATE);
    assert_eq!(dec.read_u32().unwrap(), DROP_NATIVE_REFERENCE);
    assert_eq!(dec.read_u32().unwrap(), 42);
    assert!(dec.is_empty());
}
