//! The script value model.
//!
//! Script values form a closed tagged variant: every wrapper method
//! pattern-matches on [`Value`] and every coercion path is explicit, so no
//! call site type-checks by trial. Arrays keep the scripting language's ordered
//! mixed-key shape; whether an array bridges to a structured object or a
//! sequence is decided by key classification, not by construction.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::env::Callable;

/// A key in a script array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl ArrayKey {
    /// A key that forces the containing array to be associative.
    pub fn is_assoc_key(&self) -> bool {
        !matches!(self, ArrayKey::Int(_))
    }
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayKey::Int(n) => write!(f, "{}", n),
            ArrayKey::Str(s) => write!(f, "{}", s),
            ArrayKey::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
        }
    }
}

impl From<i64> for ArrayKey {
    fn from(n: i64) -> Self {
        ArrayKey::Int(n)
    }
}

impl From<&str> for ArrayKey {
    fn from(s: &str) -> Self {
        ArrayKey::Str(s.to_string())
    }
}

impl From<String> for ArrayKey {
    fn from(s: String) -> Self {
        ArrayKey::Str(s)
    }
}

/// An ordered, mixed-key script array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Array {
    entries: Vec<(ArrayKey, Value)>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sequential array from values, keyed 0..n.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut array = Self::new();
        for value in values {
            array.push(value);
        }
        array
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (ArrayKey, Value)>) -> Self {
        let mut array = Self::new();
        for (key, value) in pairs {
            array.insert(key, value);
        }
        array
    }

    /// Append with the next free integer key (max integer key + 1, or 0).
    pub fn push(&mut self, value: Value) {
        let next = self
            .entries
            .iter()
            .filter_map(|(key, _)| match key {
                ArrayKey::Int(n) => Some(*n + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
            .max(0);
        self.entries.push((ArrayKey::Int(next), value));
    }

    /// Insert or replace the value at `key`, preserving insertion order for
    /// existing keys.
    pub fn insert(&mut self, key: impl Into<ArrayKey>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &ArrayKey) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.get(&ArrayKey::Str(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArrayKey, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// An array is associative iff at least one key is a string or boolean
    /// key; otherwise it bridges as a sequence. Load-bearing for the
    /// structured wire format.
    pub fn is_assoc(&self) -> bool {
        self.entries.iter().any(|(key, _)| key.is_assoc_key())
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_values(iter)
    }
}

/// A type-erased wrapper instance delivered to script callables, tagged with
/// its script-visible class name.
#[derive(Clone)]
pub struct Resource {
    class: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Resource {
    pub fn new<T: Any + Send + Sync>(class: &'static str, value: T) -> Self {
        Self {
            class,
            inner: Arc::new(value),
        }
    }

    pub fn from_arc<T: Any + Send + Sync>(class: &'static str, value: Arc<T>) -> Self {
        Self {
            class,
            inner: value,
        }
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource({})", self.class)
    }
}

/// A dynamically-typed script value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The language's null.
    Null,
    /// The language's explicit "no value supplied" sentinel for optional
    /// parameters. Distinct from Null at the call site, equivalent for
    /// absence checks.
    Default,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Array),
    Resource(Resource),
    Callable(Callable),
}

impl Value {
    /// Manifest kind name, used in coercion diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Default => "default",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Resource(_) => "resource",
            Value::Callable(_) => "callable",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// An argument is absent iff it is Null or the explicit Default
    /// sentinel. Every optional-argument path uses this one predicate.
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Null | Value::Default)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Callable(_))
    }

    pub fn resource<T: Any + Send + Sync>(class: &'static str, value: T) -> Value {
        Value::Resource(Resource::new(class, value))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Value::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Value::Callable(c) => Some(c),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Default, Value::Default) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Resource(a), Value::Resource(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            (Value::Callable(a), Value::Callable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
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

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<Callable> for Value {
    fn from(c: Callable) -> Self {
        Value::Callable(c)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
