use std::fmt;

use serde::{Deserialize, Serialize};

/// Operand addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Addr {
    /// The entity's static table: constants and resolved function references.
    Static(u16),
    /// The current frame's data array.
    Frame(u16),
    /// The active closure's captured-context array.
    Ctx(u16),
    /// The call's argument value.
    Arg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    /// Vector-operand marker: `small` is the count, the next `count` frame
    /// slots are the operands of a later consumer.
    Size,
    /// Copy `src` into the own slot (used to line up vector operands).
    Mov,
    /// Construct a tagged enum: variant `small`, payload from `src`.
    Union,
    /// Construct a tuple from the vector at `src`.
    Tuple,
    /// Construct a list from the vector at `src`.
    List,
    /// Construct a map from the vector at `src` (alternating key, value).
    MapNew,
    /// Read tuple element `small` of `obj`.
    Field,
    /// Read the payload of `obj`, asserting its variant is `small`.
    Unwrap,
    /// Table-dispatch on the variant of `obj`; invokes a branch body.
    Switch,
    /// Table-dispatch on the packed variants of the vector at `src`.
    Select,
    /// Call `obj` with the argument read from `src`.
    Call,
    /// Closure creation: `obj` is the target function, the vector at `src`
    /// is the captured context snapshot.
    Cl,
    /// Self-referential closure creation: like `Cl`, with the closure itself
    /// occupying the last context slot.
    Clr,
    /// Branch reference over the value at `obj` (variant `small`).
    Br,
    /// Branch reference composed over the branch reference at `obj`.
    Brb,
    /// Branch reference composed over the field reference at `obj`.
    Brf,
    /// Field reference over the value at `obj` (element `small`).
    Fr,
    /// Field reference composed over the reference at `obj`.
    Frf,
}

/// Fixed-width operation record. `small` carries variant tags and counts
/// (0–255), `table` points into the per-branch dispatch tables, and the two
/// addresses are frame or static addresses depending on the opcode.
/// Immutable once produced by the front end.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instr {
    pub op: OpCode,
    pub small: u8,
    pub table: u16,
    pub obj: Addr,
    pub src: Addr,
}

impl Instr {
    fn raw(op: OpCode, small: u8, table: u16, obj: Addr, src: Addr) -> Self {
        Self {
            op,
            small,
            table,
            obj,
            src,
        }
    }

    pub fn size(count: u8) -> Self {
        Self::raw(OpCode::Size, count, 0, Addr::Arg, Addr::Arg)
    }

    pub fn mov(src: Addr) -> Self {
        Self::raw(OpCode::Mov, 0, 0, Addr::Arg, src)
    }

    pub fn union(tag: u8, src: Addr) -> Self {
        Self::raw(OpCode::Union, tag, 0, Addr::Arg, src)
    }

    pub fn tuple(src: Addr) -> Self {
        Self::raw(OpCode::Tuple, 0, 0, Addr::Arg, src)
    }

    pub fn list(src: Addr) -> Self {
        Self::raw(OpCode::List, 0, 0, Addr::Arg, src)
    }

    pub fn map_new(src: Addr) -> Self {
        Self::raw(OpCode::MapNew, 0, 0, Addr::Arg, src)
    }

    pub fn field(index: u8, obj: Addr) -> Self {
        Self::raw(OpCode::Field, index, 0, obj, Addr::Arg)
    }

    pub fn unwrap(tag: u8, obj: Addr) -> Self {
        Self::raw(OpCode::Unwrap, tag, 0, obj, Addr::Arg)
    }

    pub fn switch(table: u16, obj: Addr) -> Self {
        Self::raw(OpCode::Switch, 0, table, obj, Addr::Arg)
    }

    pub fn select(table: u16, src: Addr) -> Self {
        Self::raw(OpCode::Select, 0, table, Addr::Arg, src)
    }

    pub fn call(obj: Addr, src: Addr) -> Self {
        Self::raw(OpCode::Call, 0, 0, obj, src)
    }

    pub fn cl(obj: Addr, src: Addr) -> Self {
        Self::raw(OpCode::Cl, 0, 0, obj, src)
    }

    pub fn clr(obj: Addr, src: Addr) -> Self {
        Self::raw(OpCode::Clr, 0, 0, obj, src)
    }

    pub fn br(tag: u8, obj: Addr) -> Self {
        Self::raw(OpCode::Br, tag, 0, obj, Addr::Arg)
    }

    pub fn brb(tag: u8, obj: Addr) -> Self {
        Self::raw(OpCode::Brb, tag, 0, obj, Addr::Arg)
    }

    pub fn brf(tag: u8, obj: Addr) -> Self {
        Self::raw(OpCode::Brf, tag, 0, obj, Addr::Arg)
    }

    pub fn fr(index: u8, obj: Addr) -> Self {
        Self::raw(OpCode::Fr, index, 0, obj, Addr::Arg)
    }

    pub fn frf(index: u8, obj: Addr) -> Self {
        Self::raw(OpCode::Frf, index, 0, obj, Addr::Arg)
    }
}

impl fmt::Debug for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            OpCode::Size => write!(f, "Size {}", self.small),
            OpCode::Mov => write!(f, "Mov {:?}", self.src),
            OpCode::Union => write!(f, "Union #{}, {:?}", self.small, self.src),
            OpCode::Tuple => write!(f, "Tuple {:?}", self.src),
            OpCode::List => write!(f, "List {:?}", self.src),
            OpCode::MapNew => write!(f, "MapNew {:?}", self.src),
            OpCode::Field => write!(f, "Field .{}, {:?}", self.small, self.obj),
            OpCode::Unwrap => write!(f, "Unwrap #{}, {:?}", self.small, self.obj),
            OpCode::Switch => write!(f, "Switch t{}, {:?}", self.table, self.obj),
            OpCode::Select => write!(f, "Select t{}, {:?}", self.table, self.src),
            OpCode::Call => write!(f, "Call {:?}, {:?}", self.obj, self.src),
            OpCode::Cl => write!(f, "Cl {:?}, {:?}", self.obj, self.src),
            OpCode::Clr => write!(f, "Clr {:?}, {:?}", self.obj, self.src),
            OpCode::Br => write!(f, "Br #{}, {:?}", self.small, self.obj),
            OpCode::Brb => write!(f, "Brb #{}, {:?}", self.small, self.obj),
            OpCode::Brf => write!(f, "Brf #{}, {:?}", self.small, self.obj),
            OpCode::Fr => write!(f, "Fr .{}, {:?}", self.small, self.obj),
            OpCode::Frf => write!(f, "Frf .{}, {:?}", self.small, self.obj),
        }
    }
}

/// Source coordinates for diagnostics, index-aligned with an instruction
/// list. Never consulted by control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
