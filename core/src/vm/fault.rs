use std::fmt;
use std::sync::Arc;

use super::instruction::SourceLoc;

/// The single abrupt-termination channel.
///
/// Any fault, from a bounds violation or mistyped operand to an explicit
/// language-level panic or cancellation, interrupts the current flow and is
/// carried upward through the call chain, accumulating the originating
/// entity and instruction address for diagnostics. The engine draws no
/// distinction between compiler-bug-grade and user-triggered faults;
/// recoverable handling lives in the surrounding effect layer.
pub struct Fault {
    kind: FaultKind,
    trace: Vec<TraceEntry>,
}

#[derive(Debug)]
pub enum FaultKind {
    /// Execution was cancelled before a call or stage could start. The
    /// effect layer recognizes this to avoid duplicate error reporting.
    Cancelled,
    /// Engine-detected fault or explicit panic.
    Panic(String),
    /// A native function returned an error that was not itself a fault.
    Native(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub entity: Arc<str>,
    pub address: usize,
    pub source: Option<SourceLoc>,
}

impl Fault {
    pub fn cancelled() -> Self {
        Self {
            kind: FaultKind::Cancelled,
            trace: Vec::new(),
        }
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Panic(message.into()),
            trace: Vec::new(),
        }
    }

    pub fn native(error: anyhow::Error) -> Self {
        Self {
            kind: FaultKind::Native(error),
            trace: Vec::new(),
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, FaultKind::Cancelled)
    }

    pub fn kind(&self) -> &FaultKind {
        &self.kind
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Record one propagation step: the entity and instruction address the
    /// fault passed through, plus mapped source coordinates when available.
    pub(crate) fn at(mut self, entity: &Arc<str>, address: usize, source: Option<SourceLoc>) -> Self {
        self.trace.push(TraceEntry {
            entity: Arc::clone(entity),
            address,
            source,
        });
        self
    }

    /// Multi-line report: the fault followed by its propagation trace,
    /// innermost entry first.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        for entry in &self.trace {
            out.push_str("\n  at ");
            out.push_str(entry.entity.as_ref());
            out.push_str(" [");
            out.push_str(&entry.address.to_string());
            out.push(']');
            if let Some(loc) = entry.source {
                out.push_str(" (");
                out.push_str(&loc.to_string());
                out.push(')');
            }
        }
        out
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FaultKind::Cancelled => write!(f, "execution cancelled"),
            FaultKind::Panic(msg) => write!(f, "{}", msg),
            FaultKind::Native(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fault({})", self.report())
    }
}

impl std::error::Error for Fault {}
