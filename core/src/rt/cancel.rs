use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Externally supplied cancellation signal.
///
/// The engine consults it immediately before invoking a callee and at every
/// stage transition. Cancellation never interrupts an in-flight native call;
/// it only prevents new calls from starting.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
