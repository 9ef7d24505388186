//! CallFrame: positional arguments in, pushed results out
//!
//! Mirrors the runtime's call stack for one bridge call. Arguments are
//! addressed 1-based; positions past the end read as nil, the same way a
//! scripting runtime reads missing arguments.

use crate::bridge::Bridge;
use crate::error::BridgeResult;
use crate::marshal::ToNative;
use crate::value::DynValue;

/// One bridge call's arguments and results.
pub struct CallFrame<'b> {
    bridge: &'b Bridge,
    args: Vec<DynValue>,
    results: Vec<DynValue>,
    nil: DynValue,
}

impl<'b> CallFrame<'b> {
    /// Create a frame holding `args` (position 1 is `args[0]`)
    pub fn new(bridge: &'b Bridge, args: Vec<DynValue>) -> Self {
        Self {
            bridge,
            args,
            results: Vec::new(),
            nil: DynValue::Nil,
        }
    }

    /// Bridge the call is running on
    pub fn bridge(&self) -> &'b Bridge {
        self.bridge
    }

    /// Number of arguments supplied by the caller
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Raw argument at 1-based `position`, nil when absent
    pub fn arg(&self, position: usize) -> &DynValue {
        position
            .checked_sub(1)
            .and_then(|index| self.args.get(index))
            .unwrap_or(&self.nil)
    }

    /// Argument at 1-based `position`, converted to `T`
    pub fn get<T: ToNative>(&self, position: usize) -> BridgeResult<T> {
        T::to_native(self.arg(position)).map_err(|e| e.at_position(position))
    }

    /// Push a result value
    pub fn push(&mut self, value: DynValue) {
        self.results.push(value);
    }

    /// Results pushed so far
    pub fn results(&self) -> &[DynValue] {
        &self.results
    }

    /// Keep the last `count` pushed results and return them
    pub fn into_results(mut self, count: usize) -> Vec<DynValue> {
        let keep = count.min(self.results.len());
        self.results.split_off(self.results.len() - keep)
    }
}
