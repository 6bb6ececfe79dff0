//! Dynamic Value Model
//!
//! Observable state is untyped at the slot level: a slot can hold a scalar,
//! an object, or a tracked wrapper around an object. This module defines
//! that value universe.
//!
//! Only object-shaped values are trackable. Scalars are plain data, and
//! wrapping them is defined as a pass-through. An [`Object`] carries identity
//! (a shared allocation), which is what the identity cache keys on.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;

use super::tracked::Tracked;

/// Error for fallible value access.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    /// The value is not of the requested type.
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    /// The object has no slot under this key.
    #[error("no such key: {0}")]
    MissingKey(String),
}

/// A dynamically typed value held in an observable slot.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A plain, untracked object.
    Object(Object),
    /// A tracked wrapper; reads and writes through it are observed.
    Tracked(Tracked),
}

impl Value {
    /// Name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Tracked(_) => "tracked object",
        }
    }

    /// Whether this value is object-shaped (and therefore trackable).
    pub fn is_object_like(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Tracked(_))
    }

    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.wrong_type("bool")),
        }
    }

    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(other.wrong_type("int")),
        }
    }

    /// Numeric coercion: both `Int` and `Float` read as `f64`.
    pub fn as_float(&self) -> Result<f64, ValueError> {
        match self {
            Value::Float(x) => Ok(*x),
            Value::Int(n) => Ok(*n as f64),
            other => Err(other.wrong_type("float")),
        }
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.wrong_type("string")),
        }
    }

    pub fn as_object(&self) -> Result<&Object, ValueError> {
        match self {
            Value::Object(obj) => Ok(obj),
            other => Err(other.wrong_type("object")),
        }
    }

    pub fn as_tracked(&self) -> Result<&Tracked, ValueError> {
        match self {
            Value::Tracked(tracked) => Ok(tracked),
            other => Err(other.wrong_type("tracked object")),
        }
    }

    pub fn into_tracked(self) -> Result<Tracked, ValueError> {
        match self {
            Value::Tracked(tracked) => Ok(tracked),
            other => Err(other.wrong_type("tracked object")),
        }
    }

    fn wrong_type(&self, expected: &'static str) -> ValueError {
        ValueError::WrongType {
            expected,
            found: self.type_name(),
        }
    }
}

/// Scalars compare by value; objects and tracked wrappers by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Tracked(a), Value::Tracked(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

impl From<Tracked> for Value {
    fn from(tracked: Tracked) -> Self {
        Value::Tracked(tracked)
    }
}

/// A plain object: a shared, insertion-ordered map of string keys to values.
///
/// Cloning shares the underlying slots: two clones are the *same* object,
/// and compare equal by identity. That identity is what the identity cache
/// uses to guarantee at most one tracked wrapper per object.
#[derive(Clone, Default)]
pub struct Object {
    slots: Arc<RwLock<IndexMap<String, Value>>>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, for literal-like construction.
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.slots.write().insert(key.into(), value.into());
        self
    }

    /// Insert or replace a slot, returning the previous value if any.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.slots.write().insert(key.into(), value.into())
    }

    /// Read a slot. This is a raw read; it does not track.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.slots.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Snapshot of the keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Stable identity of the underlying allocation.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.slots) as *const () as usize
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: objects can contain reference cycles.
        f.debug_struct("Object").field("len", &self.len()).finish()
    }
}
