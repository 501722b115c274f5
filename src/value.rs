//! Tagged value model: scalars, sequences, mappings and declared records.

use std::fmt;

use indexmap::IndexMap;
use serde::{
    de::Error as _,
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::types::{PathSegment, StatePath};

/// Rejection of a value that falls outside the four supported kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// The value (or a nested part of it) has no representation in [`Value`].
    #[error("unsupported value kind at {path}: {detail}")]
    UnsupportedValueKind {
        /// Address of the offending part, relative to the value being checked.
        path: StatePath,
        /// What was found there.
        detail: String,
    },
}

impl ValueError {
    fn unsupported(path: &StatePath, detail: impl Into<String>) -> Self {
        Self::UnsupportedValueKind {
            path: path.clone(),
            detail: detail.into(),
        }
    }
}

/// Classification of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Integer, float, string, boolean or null.
    Scalar,
    /// Ordered, index-addressable list.
    Sequence,
    /// Open string-keyed map.
    Mapping,
    /// Named bag with a fixed field set.
    Record,
}

/// Immutable leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Finite float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
}

impl Scalar {
    /// Rejects non-finite floats.
    pub fn validate(&self) -> Result<(), ValueError> {
        self.check(&StatePath::root())
    }

    fn check(&self, path: &StatePath) -> Result<(), ValueError> {
        match self {
            Self::Float(f) if !f.is_finite() => {
                Err(ValueError::unsupported(path, format!("non-finite float {f}")))
            }
            _ => Ok(()),
        }
    }
}

/// Application-declared record: a name plus a fixed, ordered field set.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    name: String,
    fields: IndexMap<String, Value>,
}

impl Record {
    /// Declares a record named `name` with the given fields.
    pub fn new<K, V>(name: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Declared record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field value by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Mutable field value by name. The field set itself cannot change.
    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields.get_mut(field)
    }

    /// True when `field` is part of the declared field set.
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    /// True when both records declare the same name and field names.
    pub fn same_shape(&self, other: &Record) -> bool {
        self.name == other.name
            && self.fields.len() == other.fields.len()
            && self.fields.keys().all(|k| other.fields.contains_key(k))
    }

    pub(crate) fn fields_mut(&mut self) -> &mut IndexMap<String, Value> {
        &mut self.fields
    }

    pub(crate) fn into_parts(self) -> (String, IndexMap<String, Value>) {
        (self.name, self.fields)
    }
}

/// A plain value tree: the snapshot representation of application state.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Leaf value.
    Scalar(Scalar),
    /// Ordered list of values.
    Sequence(Vec<Value>),
    /// String-keyed map; equality ignores insertion order.
    Mapping(IndexMap<String, Value>),
    /// Declared record.
    Record(Record),
}

impl Value {
    /// The null scalar.
    pub const NULL: Value = Value::Scalar(Scalar::Null);

    /// Builds a mapping from `(key, value)` pairs.
    pub fn mapping<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a sequence from items.
    pub fn sequence<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::Sequence(items.into_iter().map(Into::into).collect())
    }

    /// Kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Scalar(_) => ValueKind::Scalar,
            Self::Sequence(_) => ValueKind::Sequence,
            Self::Mapping(_) => ValueKind::Mapping,
            Self::Record(_) => ValueKind::Record,
        }
    }

    /// True for sequences, mappings and records.
    pub fn is_container(&self) -> bool {
        !matches!(self, Self::Scalar(_))
    }

    /// Scalar payload, if this is a scalar.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// String payload, if this is a string scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer scalar.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Child addressed by a single segment.
    pub fn child(&self, segment: &PathSegment) -> Option<&Value> {
        match (self, segment) {
            (Self::Mapping(map), PathSegment::Key(k)) => map.get(k),
            (Self::Record(rec), PathSegment::Key(k)) => rec.get(k),
            (Self::Sequence(items), PathSegment::Index(i)) => items.get(*i),
            _ => None,
        }
    }

    /// Descendant addressed by `path`; the root path yields `self`.
    pub fn at(&self, path: &StatePath) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(self, |value, segment| value.child(segment))
    }

    /// Mutable descendant addressed by `path`.
    pub fn at_mut(&mut self, path: &StatePath) -> Option<&mut Value> {
        let mut value = self;
        for segment in path.segments() {
            value = match (value, segment) {
                (Self::Mapping(map), PathSegment::Key(k)) => map.get_mut(k)?,
                (Self::Record(rec), PathSegment::Key(k)) => rec.get_mut(k)?,
                (Self::Sequence(items), PathSegment::Index(i)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(value)
    }

    /// Checks that every part of the tree is representable.
    pub fn validate(&self) -> Result<(), ValueError> {
        self.validate_at(&StatePath::root())
    }

    fn validate_at(&self, path: &StatePath) -> Result<(), ValueError> {
        match self {
            Self::Scalar(s) => s.check(path),
            Self::Sequence(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, v)| v.validate_at(&path.index(i))),
            Self::Mapping(map) => map.iter().try_for_each(|(k, v)| v.validate_at(&path.key(k))),
            Self::Record(rec) => rec
                .fields
                .iter()
                .try_for_each(|(k, v)| v.validate_at(&path.key(k))),
        }
    }

    /// Converts any serializable host value, rejecting shapes the model cannot hold.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, ValueError> {
        let json = serde_json::to_value(value)
            .map_err(|err| ValueError::unsupported(&StatePath::root(), err.to_string()))?;
        Self::from_json(json)
    }

    /// Converts a decoded JSON tree. Objects become mappings.
    pub fn from_json(json: serde_json::Value) -> Result<Self, ValueError> {
        from_json_at(json, &StatePath::root())
    }

    /// Converts to a JSON tree. Records become plain objects without their name.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Scalar(Scalar::Null) => Json::Null,
            Self::Scalar(Scalar::Bool(b)) => Json::Bool(*b),
            Self::Scalar(Scalar::Int(i)) => Json::from(*i),
            Self::Scalar(Scalar::Float(f)) => {
                serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number)
            }
            Self::Scalar(Scalar::Str(s)) => Json::String(s.clone()),
            Self::Sequence(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Self::Mapping(map) => Json::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Record(rec) => Json::Object(
                rec.fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn from_json_at(json: serde_json::Value, path: &StatePath) -> Result<Value, ValueError> {
    use serde_json::Value as Json;
    Ok(match json {
        Json::Null => Value::NULL,
        Json::Bool(b) => Value::from(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if n.is_u64() {
                return Err(ValueError::unsupported(path, format!("integer {n} exceeds i64")));
            } else {
                let f = n
                    .as_f64()
                    .ok_or_else(|| ValueError::unsupported(path, format!("number {n}")))?;
                Value::from(f)
            }
        }
        Json::String(s) => Value::from(s),
        Json::Array(items) => Value::Sequence(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| from_json_at(v, &path.index(i)))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let child = from_json_at(v, &path.key(k.as_str()))?;
                    Ok((k, child))
                })
                .collect::<Result<_, ValueError>>()?,
        ),
    })
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(Scalar::Null) => serializer.serialize_unit(),
            Self::Scalar(Scalar::Bool(b)) => serializer.serialize_bool(*b),
            Self::Scalar(Scalar::Int(i)) => serializer.serialize_i64(*i),
            Self::Scalar(Scalar::Float(f)) => serializer.serialize_f64(*f),
            Self::Scalar(Scalar::Str(s)) => serializer.serialize_str(s),
            Self::Sequence(items) => serializer.collect_seq(items),
            Self::Mapping(map) => serializer.collect_map(map),
            Self::Record(rec) => {
                let mut out = serializer.serialize_map(Some(rec.fields.len()))?;
                for (k, v) in &rec.fields {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(json).map_err(D::Error::custom)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Self::Record(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Sequence(value)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Self::Mapping(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Scalar(Scalar::Bool(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Int(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(value)))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(value)))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Scalar(Scalar::Float(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Scalar(Scalar::Str(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Scalar(Scalar::Str(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::NULL, Into::into)
    }
}
