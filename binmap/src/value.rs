use crate::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Maximum length of a bin name accepted by the store, in bytes.
pub const BIN_NAME_MAX: usize = 14;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Any non-zero integer, non-empty string or non-empty byte sequence.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Rust types stored in a bin without going through the byte codec.
pub trait NativeValue: Sized {
    const KIND: &'static str;
    fn to_value(&self) -> Value;
    fn from_value(value: Value, field: &str) -> Result<Self, AppError>;
}

fn mismatch(field: &str, expected: &'static str, found: &Value) -> AppError {
    AppError::TypeMismatch { field: field.to_string(), expected, found: found.kind() }
}

impl NativeValue for i32 {
    const KIND: &'static str = "i32";
    fn to_value(&self) -> Value {
        Value::Int(*self as i64)
    }
    fn from_value(value: Value, field: &str) -> Result<Self, AppError> {
        match value {
            Value::Int(i) => i32::try_from(i).map_err(|_| AppError::TypeMismatch { field: field.to_string(), expected: Self::KIND, found: "i64" }),
            other => Err(mismatch(field, Self::KIND, &other)),
        }
    }
}

impl NativeValue for i64 {
    const KIND: &'static str = "i64";
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }
    fn from_value(value: Value, field: &str) -> Result<Self, AppError> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(mismatch(field, Self::KIND, &other)),
        }
    }
}

impl NativeValue for String {
    const KIND: &'static str = "String";
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
    fn from_value(value: Value, field: &str) -> Result<Self, AppError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch(field, Self::KIND, &other)),
        }
    }
}

impl NativeValue for Vec<u8> {
    const KIND: &'static str = "Vec<u8>";
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
    fn from_value(value: Value, field: &str) -> Result<Self, AppError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch(field, Self::KIND, &other)),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub namespace: String,
    pub set: String,
    pub user_key: Value,
}

impl Key {
    pub fn new(namespace: impl Into<String>, set: impl Into<String>, user_key: impl Into<Value>) -> Self {
        Self { namespace: namespace.into(), set: set.into(), user_key: user_key.into() }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.set, self.user_key)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bin {
    pub name: String,
    pub value: Value,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub bins: HashMap<String, Value>,
    pub generation: u32,
}

impl Record {
    pub fn from_bins(bins: impl IntoIterator<Item = Bin>) -> Self {
        Self { bins: bins.into_iter().map(|b| (b.name, b.value)).collect(), generation: 0 }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.bins.get(name).and_then(Value::as_int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_out_of_range_integer_is_a_mismatch() {
        let err = i32::from_value(Value::Int(i64::MAX), "id").unwrap_err();
        assert!(matches!(err, AppError::TypeMismatch { expected: "i32", found: "i64", .. }));
        assert_eq!(i32::from_value(Value::Int(-7), "id").unwrap(), -7);
    }

    #[test]
    fn wrong_kind_reports_both_sides() {
        let err = String::from_value(Value::Int(1), "name").unwrap_err();
        assert_eq!(err.to_string(), "Type mismatch on `name`: expected String, found integer");
    }

    #[test]
    fn truthiness_follows_store_conventions() {
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
    }

    #[test]
    fn values_order_within_kind() {
        assert!(Value::Int(2) < Value::Int(10));
        assert!(Value::from("abc") < Value::from("abd"));
    }
}
