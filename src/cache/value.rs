//! Immutable data tree.
//!
//! Every argument, response and error that flows through the cache is a
//! [`Data`] value. Arrays and objects live behind `Arc`, so cloning is cheap
//! and unchanged subtrees can be shared between successive results. Identity
//! of a subtree is observable through [`Data::ptr_eq`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Object representation used by [`Data::Object`].
pub type DataMap = BTreeMap<String, Data>;

/// JSON-like value with shared, copy-on-write containers.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Data {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(Arc<str>),
    Array(Arc<Vec<Data>>),
    Object(Arc<DataMap>),
}

impl Data {
    /// Build an object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Data)>,
    {
        Data::Object(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Build an array from values.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Data>,
    {
        Data::Array(Arc::new(items.into_iter().collect()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Data::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Data::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Data::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Data]> {
        match self {
            Data::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&DataMap> {
        match self {
            Data::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Mutable access to an array, cloning the backing storage if shared.
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Data>> {
        match self {
            Data::Array(items) => Some(Arc::make_mut(items)),
            _ => None,
        }
    }

    /// Mutable access to an object, cloning the backing storage if shared.
    pub fn as_object_mut(&mut self) -> Option<&mut DataMap> {
        match self {
            Data::Object(map) => Some(Arc::make_mut(map)),
            _ => None,
        }
    }

    /// Look up an object field.
    pub fn get(&self, key: &str) -> Option<&Data> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Look up an array element.
    pub fn at(&self, index: usize) -> Option<&Data> {
        self.as_array().and_then(|items| items.get(index))
    }

    /// Mutable lookup of an object field.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Data> {
        self.as_object_mut().and_then(|map| map.get_mut(key))
    }

    /// Insert a field, turning `Null` into an empty object first.
    ///
    /// Returns `false` when `self` is neither an object nor `Null`.
    pub fn insert(&mut self, key: impl Into<String>, value: Data) -> bool {
        if self.is_null() {
            *self = Data::Object(Arc::new(DataMap::new()));
        }
        match self.as_object_mut() {
            Some(map) => {
                map.insert(key.into(), value);
                true
            }
            None => false,
        }
    }

    /// Push onto an array, turning `Null` into an empty array first.
    pub fn push(&mut self, value: Data) -> bool {
        if self.is_null() {
            *self = Data::Array(Arc::new(Vec::new()));
        }
        match self.as_array_mut() {
            Some(items) => {
                items.push(value);
                true
            }
            None => false,
        }
    }

    /// Identity comparison.
    ///
    /// Containers compare by pointer; scalars compare by value.
    pub fn ptr_eq(a: &Data, b: &Data) -> bool {
        match (a, b) {
            (Data::Array(x), Data::Array(y)) => Arc::ptr_eq(x, y),
            (Data::Object(x), Data::Object(y)) => Arc::ptr_eq(x, y),
            (Data::Array(_), _) | (Data::Object(_), _) => false,
            (_, Data::Array(_)) | (_, Data::Object(_)) => false,
            (x, y) => x == y,
        }
    }

    /// Human readable type name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Data::Null => "null",
            Data::Bool(_) => "boolean",
            Data::Number(_) => "number",
            Data::String(_) => "string",
            Data::Array(_) => "array",
            Data::Object(_) => "object",
        }
    }

    /// Convert into a plain `serde_json::Value`.
    pub fn to_value(&self) -> Value {
        match self {
            Data::Null => Value::Null,
            Data::Bool(b) => Value::Bool(*b),
            Data::Number(n) => Value::Number(n.clone()),
            Data::String(s) => Value::String(s.to_string()),
            Data::Array(items) => Value::Array(items.iter().map(Data::to_value).collect()),
            Data::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Data {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Data::Null,
            Value::Bool(b) => Data::Bool(b),
            Value::Number(n) => Data::Number(n),
            Value::String(s) => Data::String(Arc::from(s)),
            Value::Array(items) => Data::array(items.into_iter().map(Data::from)),
            Value::Object(map) => Data::object(map.into_iter().map(|(k, v)| (k, Data::from(v)))),
        }
    }
}

impl From<&Data> for Value {
    fn from(data: &Data) -> Self {
        data.to_value()
    }
}

impl From<bool> for Data {
    fn from(value: bool) -> Self {
        Data::Bool(value)
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::String(Arc::from(value))
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::String(Arc::from(value))
    }
}

macro_rules! data_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Data {
                fn from(value: $ty) -> Self {
                    Data::Number(Number::from(value))
                }
            }
        )*
    };
}

data_from_integer!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Data::Null, Data::Number)
    }
}

impl From<Vec<Data>> for Data {
    fn from(items: Vec<Data>) -> Self {
        Data::Array(Arc::new(items))
    }
}

impl<T: Into<Data>> From<Option<T>> for Data {
    fn from(value: Option<T>) -> Self {
        value.map_or(Data::Null, Into::into)
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("<unserializable>"),
        }
    }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Data::Null => serializer.serialize_unit(),
            Data::Bool(b) => serializer.serialize_bool(*b),
            Data::Number(n) => n.serialize(serializer),
            Data::String(s) => serializer.serialize_str(s),
            Data::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Data::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Data {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Data::from)
    }
}
