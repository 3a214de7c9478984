//! The bytecode execution subsystem.
//!
//! `seed` holds the unlinked representation the front end emits, `link`
//! turns it into sized, executable entities, and `machine` walks the result
//! instruction by instruction (or stage by stage when a plan is present).

mod dispatch;
mod fault;
mod frame;
mod instruction;
mod link;
mod machine;
mod seed;

pub use dispatch::*;
pub use fault::*;
pub use frame::*;
pub use instruction::*;
pub use link::*;
pub use machine::*;
pub use seed::*;
