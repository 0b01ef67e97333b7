//! Adapter-native values and rows.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A dynamically-typed value as exchanged with adapters.
///
/// Association data merged into a row travels as nested [`Value::Record`]
/// (single target) or [`Value::Array`] of records (many targets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Missing value
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Text string
    Text(String),

    /// Date and time without zone
    DateTime(NaiveDateTime),

    /// Ordered list of values
    Array(Vec<Value>),

    /// Nested row
    Record(Record),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or the empty string; both are treated as "no value" when mapping.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::BigInt(_) => "integer",
            Value::Double(_) => "float",
            Value::Text(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::BigInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Correlation key for this value, or `None` when it cannot identify a row.
    ///
    /// Integral floats and strings holding the canonical form of an integer
    /// collapse onto [`Key::Int`] so that keys read from differently typed
    /// columns still match. `"007"` and `"+7"` stay text.
    pub fn key(&self) -> Option<Key> {
        match self {
            Value::Bool(v) => Some(Key::Bool(*v)),
            Value::BigInt(v) => Some(Key::Int(*v)),
            Value::Double(v) => {
                if v.fract() == 0.0 && v.is_finite() && v.abs() < 9.0e15 {
                    Some(Key::Int(*v as i64))
                } else {
                    Some(Key::Float(v.to_bits()))
                }
            }
            Value::Text(s) => match s.parse::<i64>() {
                Ok(v) if v.to_string() == *s => Some(Key::Int(v)),
                _ => Some(Key::Text(s.clone())),
            },
            Value::DateTime(dt) => Some(Key::DateTime(*dt)),
            Value::Null | Value::Array(_) | Value::Record(_) => None,
        }
    }

    /// Loose ordering used for filtering and sorting.
    ///
    /// Integers and floats compare numerically; values of unrelated types
    /// are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::BigInt(a), Value::BigInt(b)) => Some(a.cmp(b)),
            (Value::BigInt(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::BigInt(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => match (self.key(), other.key()) {
                (Some(a), Some(b)) if a == b => Some(Ordering::Equal),
                _ => None,
            },
        }
    }

    /// Equality after key normalization (`Text("7")` equals `BigInt(7)`).
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

/// Hashable identity of a [`Value`], used to correlate rows across adapters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Key {
    /// Back to a plain value, for use in conditions.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Bool(v) => Value::Bool(*v),
            Key::Int(v) => Value::BigInt(*v),
            Key::Float(bits) => Value::Double(f64::from_bits(*bits)),
            Key::Text(s) => Value::Text(s.clone()),
            Key::DateTime(dt) => Value::DateTime(*dt),
        }
    }
}

/// A single adapter row: column name to value.
///
/// Columns are kept sorted so that serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Value> {
        self.values.get_mut(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(column.into(), value.into())
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Correlation key of a column, `None` if absent or null.
    pub fn key(&self, column: &str) -> Option<Key> {
        self.get(column).and_then(Value::key)
    }

    /// Copy of this row restricted to `columns`; an empty list keeps all.
    pub fn project(&self, columns: &[String]) -> Record {
        if columns.is_empty() {
            return self.clone();
        }
        let values = self
            .values
            .iter()
            .filter(|(k, _)| columns.iter().any(|c| c == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Record { values }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        k.to_value()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
