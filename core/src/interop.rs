//! The boundary handed to native functions.
//!
//! A native receives its argument plus an `Interop`, through which it can
//! re-enter the engine, observe cancellation, and reach the host facilities
//! the embedder wired up. Faults created inside a re-entrant call travel
//! through the `anyhow` boundary intact and are recovered by downcast on the
//! engine side.

use std::io::Write;
use std::sync::{Arc, MutexGuard};

use anyhow::Result;

use crate::rt::{CancelSignal, WorkerPool};
use crate::val::Value;
use crate::vm::Machine;

pub struct Interop {
    machine: Machine,
}

impl Interop {
    pub(crate) fn new(machine: Machine) -> Self {
        Self { machine }
    }

    /// Re-enter the engine: apply any callable value, including closures and
    /// references, from inside a native function.
    pub fn call(&self, callee: &Value, argument: Value) -> Result<Value> {
        self.machine.call(callee, argument).map_err(Into::into)
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        self.machine.cancel_signal()
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        self.machine.pool()
    }

    /// Environment lookup, honoring the embedder's overrides before the
    /// process environment.
    pub fn env_var(&self, key: &str) -> Option<String> {
        self.machine.env_var(key)
    }

    pub fn asset(&self, name: &str) -> Option<Arc<[u8]>> {
        self.machine.asset(name)
    }

    pub fn stdout(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.machine.io().out()
    }

    pub fn stderr(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.machine.io().err()
    }
}
