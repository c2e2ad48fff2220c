//! The table of JS-side functions native code can invoke by numeric id.

use crate::error::RuntimeResult;
use crate::runtime::Runtime;
use crate::value::Value;

/// Looks up and invokes a registered JS-side function by id.
///
/// Implementations receive `&mut Runtime` (not just the argument list)
/// because a registered function is free to call back out to the peer
/// itself, through a [`crate::peer::PeerFunction`] argument it was handed,
/// which needs the same heap, type cache and transport the rest of the
/// dispatch loop uses.
pub trait FunctionRegistry {
    /// Invoke the function registered at `fn_id` with `args`, returning its
    /// result or a [`crate::error::RuntimeError`].
    fn call(&self, rt: &mut Runtime, fn_id: u32, args: Vec<Value>) -> RuntimeResult<Value>;
}

type RegisteredFn = Box<dyn Fn(&mut Runtime, Vec<Value>) -> RuntimeResult<Value>>;

/// A plain, index-addressed [`FunctionRegistry`]. Registration is append-only
/// and the resulting index is the function's wire id, mirroring how
/// exported functions are numbered on the peer side.
#[derive(Default)]
pub struct VecRegistry {
    functions: Vec<RegisteredFn>,
}

impl VecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, returning the id it was assigned.
    pub fn register<F>(&mut self, f: F) -> u32
    where
        F: Fn(&mut Runtime, Vec<Value>) -> RuntimeResult<Value> + 'static,
    {
        self.functions.push(Box::new(f));
        (self.functions.len() - 1) as u32
    }
}

impl FunctionRegistry for VecRegistry {
    fn call(&self, rt: &mut Runtime, fn_id: u32, args: Vec<Value>) -> RuntimeResult<Value> {
        match self.functions.get(fn_id as usize) {
            Some(f) => f(rt, args),
            None => Err(crate::error::RuntimeError::ProtocolViolation(format!(
                "no function registered at id {fn_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_sequential_ids() {
        let mut reg = VecRegistry::new();
        let a = reg.register(|_rt, _args| Ok(Value::Undefined));
        let b = reg.register(|_rt, _args| Ok(Value::Undefined));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn calling_an_unregistered_id_is_a_protocol_violation() {
        let reg = VecRegistry::new();
        let mut rt = Runtime::new_for_test();
        assert!(reg.call(&mut rt, 0, vec![]).is_err());
    }
}
