//! Worker pool and cancellation primitives backing staged execution.

mod cancel;
mod pool;

pub use cancel::CancelSignal;
pub use pool::WorkerPool;
