//! Functional references: callable read-or-update access to a variant or
//! tuple field without in-place mutation.

use std::fmt;
use std::sync::Arc;

use crate::vm::Fault;

use super::Value;

/// What a reference addresses inside its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
    /// The payload of the union variant with this tag.
    Branch(u8),
    /// The tuple element at this index.
    Field(u8),
}

enum RefBase {
    /// The reference addresses into a plain value.
    Value(Value),
    /// The reference composes over another reference: its parent is the
    /// value currently read through the base, and writes rebuild upward.
    Ref(Arc<ReferenceValue>),
}

pub struct ReferenceValue {
    base: RefBase,
    accessor: Accessor,
}

impl ReferenceValue {
    pub fn accessor(&self) -> Accessor {
        self.accessor
    }

    pub fn over_value(parent: Value, accessor: Accessor) -> Self {
        Self {
            base: RefBase::Value(parent),
            accessor,
        }
    }

    pub fn over_ref(base: Arc<ReferenceValue>, accessor: Accessor) -> Self {
        Self {
            base: RefBase::Ref(base),
            accessor,
        }
    }

    /// Read the addressed variant/field. Returns the outermost parent,
    /// unchanged, alongside the current value.
    pub fn read(&self) -> Result<(Value, Value), Fault> {
        match &self.base {
            RefBase::Value(parent) => {
                let value = access(parent, self.accessor)?;
                Ok((parent.clone(), value))
            }
            RefBase::Ref(base) => {
                let (outer, inner_parent) = base.read()?;
                let value = access(&inner_parent, self.accessor)?;
                Ok((outer, value))
            }
        }
    }

    /// Non-destructively replace the addressed variant/field. Returns the
    /// rebuilt outermost parent alongside the written value. The original
    /// parent is untouched; old references to it still observe the old value.
    pub fn write(&self, value: Value) -> Result<(Value, Value), Fault> {
        match &self.base {
            RefBase::Value(parent) => {
                let rebuilt = replace(parent, self.accessor, value.clone())?;
                Ok((rebuilt, value))
            }
            RefBase::Ref(base) => {
                let (_, inner_parent) = base.read()?;
                let rebuilt = replace(&inner_parent, self.accessor, value.clone())?;
                let (outer, _) = base.write(rebuilt)?;
                Ok((outer, value))
            }
        }
    }
}

fn access(parent: &Value, accessor: Accessor) -> Result<Value, Fault> {
    match (accessor, parent) {
        (Accessor::Branch(tag), Value::Union(u)) => {
            if u.tag != tag {
                return Err(Fault::panic(format!(
                    "branch reference expects variant {}, found {}",
                    tag, u.tag
                )));
            }
            Ok(u.payload.clone())
        }
        (Accessor::Field(index), Value::Tuple(items)) => items
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Fault::panic(format!("field reference {} out of range ({} fields)", index, items.len()))),
        (Accessor::Branch(_), other) => Err(Fault::panic(format!(
            "branch reference over a {}, expected a union",
            other.type_name()
        ))),
        (Accessor::Field(_), other) => Err(Fault::panic(format!(
            "field reference over a {}, expected a tuple",
            other.type_name()
        ))),
    }
}

fn replace(parent: &Value, accessor: Accessor, value: Value) -> Result<Value, Fault> {
    match (accessor, parent) {
        (Accessor::Branch(tag), Value::Union(u)) => {
            if u.tag != tag {
                return Err(Fault::panic(format!(
                    "branch reference expects variant {}, found {}",
                    tag, u.tag
                )));
            }
            Ok(Value::union(tag, value))
        }
        (Accessor::Field(index), Value::Tuple(items)) => {
            let index = index as usize;
            if index >= items.len() {
                return Err(Fault::panic(format!(
                    "field reference {} out of range ({} fields)",
                    index,
                    items.len()
                )));
            }
            let mut rebuilt: Vec<Value> = items.to_vec();
            rebuilt[index] = value;
            Ok(Value::tuple(rebuilt))
        }
        (Accessor::Branch(_), other) => Err(Fault::panic(format!(
            "branch reference over a {}, expected a union",
            other.type_name()
        ))),
        (Accessor::Field(_), other) => Err(Fault::panic(format!(
            "field reference over a {}, expected a tuple",
            other.type_name()
        ))),
    }
}

impl fmt::Debug for ReferenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            RefBase::Value(v) => write!(f, "Reference({:?} over {:?})", self.accessor, v),
            RefBase::Ref(r) => write!(f, "Reference({:?} over {:?})", self.accessor, r),
        }
    }
}
