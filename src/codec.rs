//! JSON text encoding of state snapshots.
//!
//! Records encode as plain objects, so decoding alone cannot tell a record
//! from a mapping. [`decode_as`] re-applies the record shapes of a template
//! value, which is how a stored snapshot is restored onto a declared state.

use crate::{
    types::StatePath,
    value::{Record, Value, ValueError},
};

/// Encode/decode failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Malformed JSON text.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// The value holds something the model cannot represent.
    #[error(transparent)]
    Value(#[from] ValueError),
    /// Decoded data does not fit the template's record shape.
    #[error("{path}: expected record `{record}`, found {found}")]
    Shape {
        /// Address of the mismatch.
        path: StatePath,
        /// Record the template declares there.
        record: String,
        /// What the data holds instead.
        found: String,
    },
}

/// Encodes a snapshot as JSON text.
pub fn encode(value: &Value) -> Result<String, CodecError> {
    value.validate()?;
    Ok(serde_json::to_string(value)?)
}

/// Decodes JSON text; objects become mappings.
pub fn decode(text: &str) -> Result<Value, CodecError> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Ok(Value::from_json(json)?)
}

/// Decodes JSON text and restores the record shapes found in `template`.
///
/// Fields missing from the data keep the template's value; fields the record
/// does not declare are dropped. Below the root, data that is not an object
/// where the template holds a record is kept as stored, since record fields
/// and sequence items accept any value at write time. Only a root of the
/// wrong kind fails with [`CodecError::Shape`].
///
/// Sequence items take their shape from the template's first item. Items of a
/// sequence declared empty have no shape to restore and come back as mappings.
pub fn decode_as(template: &Value, text: &str) -> Result<Value, CodecError> {
    let value = decode(text)?;
    if let (Value::Record(shape), found) = (template, &value) {
        if !matches!(found, Value::Mapping(_)) {
            return Err(CodecError::Shape {
                path: StatePath::root(),
                record: shape.name().to_string(),
                found: format!("{:?}", found.kind()),
            });
        }
    }
    Ok(conform(template, value, &StatePath::root()))
}

fn conform(template: &Value, value: Value, path: &StatePath) -> Value {
    match (template, value) {
        (Value::Record(shape), Value::Mapping(mut map)) => {
            let mut fields = Vec::with_capacity(shape.fields().len());
            for (name, default) in shape.fields() {
                let field = match map.shift_remove(name) {
                    Some(found) => conform(default, found, &path.key(name.as_str())),
                    None => {
                        tracing::warn!(%path, field = %name, "stored state lacks field, keeping initial value");
                        default.clone()
                    }
                };
                fields.push((name.clone(), field));
            }
            for extra in map.keys() {
                tracing::warn!(%path, field = %extra, "dropping undeclared field from stored state");
            }
            Value::Record(Record::new(shape.name(), fields))
        }
        (Value::Record(shape), found) => {
            tracing::warn!(
                %path,
                record = shape.name(),
                found = ?found.kind(),
                "stored value replaced the declared record, keeping it as stored"
            );
            found
        }
        (Value::Mapping(shapes), Value::Mapping(map)) => Value::Mapping(
            map.into_iter()
                .map(|(key, item)| {
                    let item = match shapes.get(&key) {
                        Some(shape) => conform(shape, item, &path.key(key.as_str())),
                        None => item,
                    };
                    (key, item)
                })
                .collect(),
        ),
        (Value::Sequence(shapes), Value::Sequence(items)) => match shapes.first() {
            Some(shape) => Value::Sequence(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| conform(shape, item, &path.index(i)))
                    .collect(),
            ),
            None => {
                if items.iter().any(|item| matches!(item, Value::Mapping(_))) {
                    tracing::warn!(%path, "sequence declared empty, restoring its objects as mappings");
                }
                Value::Sequence(items)
            }
        },
        (_, value) => value,
    }
}
