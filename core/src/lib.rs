//! Rill bytecode execution engine.
//!
//! Links `FunctionSeed` programs produced by the front end into executable
//! `FunctionEntity` graphs and runs them on a [`vm::Machine`]. Effect-flagged
//! entities are invoked at program start; everything else is reached through
//! ordinary calls, table-driven branch dispatch, and the interop boundary.

pub mod interop;
pub mod rt;
pub mod util;
pub mod val;
pub mod vm;
