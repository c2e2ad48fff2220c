//! JS-side IPC runtime for a native/webview binding layer.
//!
//! A native process drives a webview as though it were an in-process host:
//! it calls JS functions, JS calls back into native functions and methods,
//! and object identity is preserved across the boundary even though the
//! only channel between the two sides is an ordered, synchronous
//! request/response transport. This crate is the JS-side half of that
//! protocol: the heap that gives JS values stable numeric identities, the
//! wire codec, the type-directed marshaller, the dispatch loop, and the
//! peer-held wrappers that notify native code when JS drops a reference.
//!
//! Not thread-safe: a webview runs on one cooperative thread, and so does
//! this runtime. No asynchronous I/O, no retries, no cross-boundary cycle
//! collection; lifetime is managed entirely by explicit drop messages.

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod heap;
pub mod peer;
pub mod registry;
pub mod runtime;
pub mod transport;
pub mod types;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{RuntimeError, RuntimeResult};
pub use heap::ObjectHeap;
pub use peer::{PeerFunction, PeerObject};
pub use registry::{FunctionRegistry, VecRegistry};
pub use runtime::Runtime;
pub use transport::{Endpoint, Transport};
pub use types::{Signature, TypeCache, TypeDescriptor};
pub use value::{HeapObject, Value};
