//! Peer-held references: wrappers JS gets back for a native function or a
//! native object, whose `Drop` impl is the only finalization signal this
//! crate has (there is no tracing GC spanning the boundary).

use crate::codec::Encoder;
use crate::dispatch::{CALL_EXPORTED_PEER_METHOD, DROP_NATIVE_REFERENCE, INNER_SELECTOR_CALL_NATIVE, MSG_EVALUATE};
use crate::error::RuntimeResult;
use crate::runtime::Runtime;
use crate::transport::{Endpoint, Transport};
use crate::types::TypeDescriptor;
use crate::value::Value;
use std::rc::Rc;

/// A callable proxy for one native function. Calling it sends an `Evaluate`
/// to the peer and decodes its `Respond`; dropping it (once the last `Rc`
/// goes away) sends the reserved drop notification.
#[derive(Debug)]
pub struct PeerFunction {
    fn_id: u32,
    param_types: Vec<TypeDescriptor>,
    return_type: TypeDescriptor,
    transport: Rc<dyn Transport>,
}

impl PeerFunction {
    /// Wrap a native function reference decoded off the wire.
    pub fn new(
        fn_id: u32,
        param_types: Vec<TypeDescriptor>,
        return_type: TypeDescriptor,
        transport: Rc<dyn Transport>,
    ) -> Rc<Self> {
        Rc::new(Self {
            fn_id,
            param_types,
            return_type,
            transport,
        })
    }

    /// The native function id this wrapper proxies.
    pub fn fn_id(&self) -> u32 {
        self.fn_id
    }

    /// Call the native function, sending its arguments as a fresh `Evaluate`
    /// and decoding its eventual `Respond`. Any `Evaluate`s the peer issues
    /// on the way to that `Respond` are processed in turn by `rt`, since a
    /// synchronous round trip may nest arbitrarily deep.
    pub fn call(&self, rt: &mut Runtime, args: Vec<Value>) -> RuntimeResult<Value> {
        let frame = rt.heap.push_borrow_frame();
        let mut enc = Encoder::new();
        enc.push_u8(MSG_EVALUATE);
        enc.push_u32(INNER_SELECTOR_CALL_NATIVE);
        enc.push_u32(self.fn_id);
        for (desc, arg) in self.param_types.iter().zip(args.iter()) {
            desc.encode(&mut enc, &mut rt.heap, arg)?;
        }
        let buf = enc.finalize();
        let reply = self
            .transport
            .send(Endpoint::Outbound, &buf)
            .unwrap_or_else(crate::dispatch::empty_respond_bytes);
        let respond_bytes = rt.dispatch(&reply)?;
        rt.heap.pop_borrow_frame(frame);
        let mut dec = crate::codec::Decoder::new(&respond_bytes)?;
        dec.read_u8()?;
        let result = self.return_type.decode(&mut dec, &mut rt.heap, &self.transport)?;
        dec.expect_empty()?;
        Ok(result)
    }
}

impl Drop for PeerFunction {
    fn drop(&mut self) {
        let mut enc = Encoder::new();
        enc.push_u8(MSG_EVALUATE);
        enc.push_u32(DROP_NATIVE_REFERENCE);
        enc.push_u32(self.fn_id);
        let _ = self.transport.send(Endpoint::Outbound, &enc.finalize());
    }
}

/// A handle to a native object plus the class name needed to address its
/// exported methods. Finalization invokes the class's `__drop` export.
#[derive(Debug)]
pub struct PeerObject {
    handle: u64,
    class_name: String,
    transport: Rc<dyn Transport>,
}

impl PeerObject {
    /// Wrap a native object handle decoded off the wire.
    pub fn new(handle: u64, class_name: String, transport: Rc<dyn Transport>) -> Rc<Self> {
        Rc::new(Self {
            handle,
            class_name,
            transport,
        })
    }

    /// The opaque handle this wrapper addresses.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Invoke an exported method, prefixing the argument list with the
    /// `ClassName::method` selector and this object's handle.
    pub fn call_method(
        &self,
        rt: &mut Runtime,
        method: &str,
        param_types: &[TypeDescriptor],
        return_type: &TypeDescriptor,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        let frame = rt.heap.push_borrow_frame();
        let mut enc = Encoder::new();
        enc.push_u8(MSG_EVALUATE);
        enc.push_u32(INNER_SELECTOR_CALL_NATIVE);
        enc.push_u32(CALL_EXPORTED_PEER_METHOD);
        let selector = format!("{}::{}", self.class_name, method);
        TypeDescriptor::String.encode(&mut enc, &mut rt.heap, &Value::String(selector.into()))?;
        enc.push_u64(self.handle);
        for (desc, arg) in param_types.iter().zip(args.iter()) {
            desc.encode(&mut enc, &mut rt.heap, arg)?;
        }
        let buf = enc.finalize();
        let reply = self
            .transport
            .send(Endpoint::Outbound, &buf)
            .unwrap_or_else(crate::dispatch::empty_respond_bytes);
        let respond_bytes = rt.dispatch(&reply)?;
        rt.heap.pop_borrow_frame(frame);
        let mut dec = crate::codec::Decoder::new(&respond_bytes)?;
        dec.read_u8()?;
        let result = return_type.decode(&mut dec, &mut rt.heap, &self.transport)?;
        dec.expect_empty()?;
        Ok(result)
    }

    fn send_fire_and_forget(&self, method: &str) {
        let mut enc = Encoder::new();
        enc.push_u8(MSG_EVALUATE);
        enc.push_u32(INNER_SELECTOR_CALL_NATIVE);
        enc.push_u32(CALL_EXPORTED_PEER_METHOD);
        let selector = format!("{}::{}", self.class_name, method);
        enc.push_string(&selector);
        enc.push_u64(self.handle);
        let _ = self.transport.send(Endpoint::Outbound, &enc.finalize());
    }
}

impl Drop for PeerObject {
    fn drop(&mut self) {
        self.send_fire_and_forget("__drop");
    }
}
