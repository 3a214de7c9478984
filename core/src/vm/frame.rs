use std::sync::Arc;

use crate::val::{FunctionValue, Value};

/// Per-invocation addressable storage.
///
/// Allocation happens exactly once per call: the data array is sized to the
/// entity's computed frame length, which already covers every branch body.
/// A branch never gets its own frame; it runs against the same data array at
/// a positive offset, so bindings visible at the dispatch point stay visible
/// inside every branch. Tail calls reuse the frame in place.
pub struct Frame {
    pub function: FunctionValue,
    pub argument: Value,
    pub data: Vec<Value>,
}

impl Frame {
    pub fn new(function: FunctionValue, argument: Value) -> Self {
        let len = function.entity().frame_len;
        Self {
            function,
            argument,
            data: vec![Value::unit(); len],
        }
    }

    #[inline]
    pub(crate) fn context(&self) -> Option<&Arc<[Value]>> {
        self.function.context()
    }
}
