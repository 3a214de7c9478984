//! Runtime values.
//!
//! Values are immutable once constructed: functional update always produces
//! a new tuple or union, never mutates in place. Everything is `Arc`-backed
//! so frame slots, closure contexts, and parallel flow snapshots share
//! storage cheaply.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::interop::Interop;
use crate::vm::EntitySlot;

mod reference;

pub use reference::{Accessor, ReferenceValue};


/// Native functions are ordinary two-argument procedures: the call argument
/// and the interop handle.
pub type NativeFn = fn(Value, &Interop) -> anyhow::Result<Value>;

#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub f: NativeFn,
}

/// A tagged-enum value: variant index plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionValue {
    pub tag: u8,
    pub payload: Value,
}

/// An ordinary language function: a linked entity plus its captured context.
/// Plain (context-free) function values are what the static table holds;
/// `CL`/`CLR` attach a context snapshot to produce closures.
#[derive(Clone)]
pub struct FunctionValue {
    pub(crate) slot: Arc<EntitySlot>,
    pub(crate) context: Option<Arc<[Value]>>,
}

impl FunctionValue {
    pub fn plain(slot: Arc<EntitySlot>) -> Self {
        Self { slot, context: None }
    }

    pub fn with_context(slot: Arc<EntitySlot>, context: Arc<[Value]>) -> Self {
        Self {
            slot,
            context: Some(context),
        }
    }

    #[inline]
    pub fn entity(&self) -> &crate::vm::FunctionEntity {
        self.slot.entity()
    }

    #[inline]
    pub fn context(&self) -> Option<&Arc<[Value]>> {
        self.context.as_ref()
    }

    /// True when both values execute the same linked entity, regardless of
    /// captured context. This is the identity the tail-call rule checks.
    #[inline]
    pub fn same_entity(&self, other: &FunctionValue) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.try_entity() {
            Some(entity) => write!(f, "Function({})", entity.name),
            None => write!(f, "Function(<unlinked>)"),
        }
    }
}

/// The closed set of runtime values.
#[derive(Clone)]
pub enum Value {
    Union(Arc<UnionValue>),
    Tuple(Arc<[Value]>),
    List(Arc<[Value]>),
    /// Map construction output: ordered key/value association pairs.
    Pairs(Arc<[(Value, Value)]>),
    Function(FunctionValue),
    Native(NativeFunction),
    Reference(Arc<ReferenceValue>),
    /// Opaque host value crossing the interop boundary (numbers, strings,
    /// handles). The engine never looks inside.
    Host(Arc<dyn Any + Send + Sync>),
    /// Vector-operand marker written by the SIZE instruction: the next
    /// `count` frame slots are the operands. Never escapes a frame.
    Size(usize),
    /// Placeholder a CLR closure stores in its own last context slot.
    /// Reading the slot materializes the closure, so no reference cycle is
    /// ever created.
    SelfRef,
}

static UNIT: Lazy<Value> = Lazy::new(|| Value::Tuple(Arc::from(Vec::new())));

impl Value {
    /// The empty tuple, shared process-wide; also the frame slot filler.
    #[inline]
    pub fn unit() -> Value {
        UNIT.clone()
    }

    pub fn union(tag: u8, payload: Value) -> Value {
        Value::Union(Arc::new(UnionValue { tag, payload }))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(items.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(items.into())
    }

    pub fn host<T: Any + Send + Sync>(value: T) -> Value {
        Value::Host(Arc::new(value))
    }

    pub fn downcast_host<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            Value::Host(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<&UnionValue> {
        match self {
            Value::Union(u) => Some(u),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Union(_) => "union",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Pairs(_) => "pairs",
            Value::Function(_) => "function",
            Value::Native(_) => "native function",
            Value::Reference(_) => "reference",
            Value::Host(_) => "host value",
            Value::Size(_) => "size marker",
            Value::SelfRef => "self reference",
        }
    }
}

fn host_eq(a: &Arc<dyn Any + Send + Sync>, b: &Arc<dyn Any + Send + Sync>) -> bool {
    if let (Some(x), Some(y)) = (a.downcast_ref::<i64>(), b.downcast_ref::<i64>()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<f64>(), b.downcast_ref::<f64>()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<String>(), b.downcast_ref::<String>()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.downcast_ref::<&'static str>(), b.downcast_ref::<&'static str>()) {
        return x == y;
    }
    Arc::ptr_eq(a, b)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Union(a), Value::Union(b)) => a.tag == b.tag && a.payload == b.payload,
            (Value::Tuple(a), Value::Tuple(b)) => a[..] == b[..],
            (Value::List(a), Value::List(b)) => a[..] == b[..],
            (Value::Pairs(a), Value::Pairs(b)) => a[..] == b[..],
            (Value::Function(a), Value::Function(b)) => {
                a.same_entity(b)
                    && match (a.context(), b.context()) {
                        (None, None) => true,
                        (Some(x), Some(y)) => x[..] == y[..],
                        _ => false,
                    }
            }
            (Value::Native(a), Value::Native(b)) => a.f as usize == b.f as usize,
            (Value::Reference(a), Value::Reference(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => host_eq(a, b),
            (Value::Size(a), Value::Size(b)) => a == b,
            (Value::SelfRef, Value::SelfRef) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Union(u) => write!(f, "Union({}, {:?})", u.tag, u.payload),
            Value::Tuple(items) => {
                let mut t = f.debug_tuple("Tuple");
                for item in items.iter() {
                    t.field(item);
                }
                t.finish()
            }
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Pairs(pairs) => f.debug_map().entries(pairs.iter().map(|(k, v)| (k, v))).finish(),
            Value::Function(fun) => fun.fmt(f),
            Value::Native(n) => write!(f, "Native({})", n.name),
            Value::Reference(r) => r.fmt(f),
            Value::Host(v) => match v.downcast_ref::<i64>() {
                Some(n) => write!(f, "Host({})", n),
                None => write!(f, "Host(<opaque>)"),
            },
            Value::Size(n) => write!(f, "Size({})", n),
            Value::SelfRef => write!(f, "SelfRef"),
        }
    }
}
