//! Unlinked program representation emitted by the front end.
//!
//! Seeds are produced once at program load and discarded after linking.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::val::Value;

use super::dispatch::DispatchTable;
use super::instruction::{Instr, SourceLoc};

/// The ordered collection of function seeds plus metadata handed to the
/// engine by the external compiler.
#[derive(Debug, Default)]
pub struct Program {
    pub functions: Vec<FunctionSeed>,
    /// Entry path metadata reported by the front end (module/main name).
    pub entry: Option<String>,
    /// Loaded resources exposed to native functions through the interop
    /// handle (assets, serialization tables).
    pub assets: Vec<(String, Arc<[u8]>)>,
}

/// The unlinked, pre-sizing representation of one function.
#[derive(Debug)]
pub struct FunctionSeed {
    pub name: Arc<str>,
    pub trunk: BranchSeed,
    pub statics: Vec<StaticSeed>,
    /// Declared closure-context length; zero for plain functions.
    pub context_len: u16,
    /// Effect-flagged entities are invoked with no argument at program start.
    pub effect: bool,
}

/// One function body or nested pattern-match branch body.
#[derive(Debug, Default)]
pub struct BranchSeed {
    pub instrs: Vec<Instr>,
    pub tables: Vec<DispatchTable>,
    pub branches: Vec<BranchSeed>,
    /// Optional stage plan; absent means the whole body is one flow.
    pub stages: Option<Vec<StageSeed>>,
    /// Index-aligned with `instrs`; purely for diagnostics.
    pub source_map: Vec<SourceLoc>,
}

/// A static-table entry: a literal, a forward reference to a top-level
/// function (resolved by arena index during linking), or a nested closure
/// body compiled in place.
#[derive(Debug)]
pub enum StaticSeed {
    Value(Value),
    FunctionRef(usize),
    Closure(Box<FunctionSeed>),
}

/// One ordered step of execution containing one or more concurrently-safe
/// flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSeed {
    pub flows: Vec<FlowSeed>,
}

/// A contiguous instruction-index range (relative to the owning body),
/// data-independent from sibling flows in the same stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSeed {
    pub start: usize,
    pub end: usize,
}

impl FlowSeed {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
