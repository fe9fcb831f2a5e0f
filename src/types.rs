//! Core types shared across the engine.

use crate::intercept::{Target, WeakTarget};
use crate::runtime::Class;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Name of an operation sent to an object.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector(Arc<str>);

impl Selector {
    pub fn new(name: impl AsRef<str>) -> Self {
        Selector(Arc::from(name.as_ref()))
    }

    /// The object-destruction selector.
    pub fn dealloc() -> Self {
        Selector::new("dealloc")
    }

    /// Setter selector for a property (`name` -> `setName:`).
    pub fn setter_for(property: &str) -> Self {
        let mut chars = property.chars();
        let capitalized: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        Selector::new(format!("set{}:", capitalized))
    }

    /// Getter selector for a property.
    pub fn getter_for(property: &str) -> Self {
        Selector::new(property)
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_dealloc(&self) -> bool {
        &*self.0 == "dealloc"
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self.0)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::new(name)
    }
}

/// Identifier of a registered class.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u64);

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

/// Handle issued to a wrapped instance; keys the observer side table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single observer entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

/// Shared by-reference cell, used for out-parameters.
///
/// Forwarding passes the same cell through, so writes made by the callee are
/// visible to the caller.
#[derive(Clone, Default)]
pub struct Reference(Arc<Mutex<Value>>);

impl Reference {
    pub fn new(value: Value) -> Self {
        Reference(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.lock().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.lock() = value;
    }

    pub fn ptr_eq(&self, other: &Reference) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({:?})", self.get())
    }
}

/// A boxed argument or return value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Selector(Selector),
    Class(Arc<Class>),
    Object(Target),
    Weak(WeakTarget),
    Ref(Reference),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Strong handle to the referenced object, upgrading weak references.
    pub fn as_target(&self) -> Option<Target> {
        match self {
            Value::Object(target) => Some(target.clone()),
            Value::Weak(weak) => weak.upgrade(),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Selector(_) => "selector",
            Value::Class(_) => "class",
            Value::Object(_) => "object",
            Value::Weak(_) => "weak object",
            Value::Ref(_) => "reference",
        }
    }
}

/// Scalars compare by value; objects, classes and references by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Selector(a), Value::Selector(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => a.id() == b.id(),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Weak(a), Value::Weak(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Weak(b)) | (Value::Weak(b), Value::Object(a)) => {
                b.upgrade().map_or(false, |b| a.ptr_eq(&b))
            }
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Target> for Value {
    fn from(v: Target) -> Self {
        Value::Object(v)
    }
}

impl From<Reference> for Value {
    fn from(v: Reference) -> Self {
        Value::Ref(v)
    }
}
