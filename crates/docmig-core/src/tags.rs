//! Tag shape normalization.
//!
//! Three encodings of `tags` exist in storage:
//!
//! ```text
//! legacy record list   [{"key": "type", "value": "test"}, {"key": "user"}]
//! empty list           []
//! canonical mapping    {"type": "test", "user": ""}
//! ```
//!
//! [`normalize`] turns any of them into the canonical mapping.
//! [`denormalize`] expands a mapping into the enriched record list that some
//! collections still store; it injects metadata and is not an inverse of
//! `normalize`.

use serde_json::{Map, Value};
use thiserror::Error;

pub type TagMap = Map<String, Value>;

pub const MANAGED_TAG_TYPE: &str = "MANAGED";

/// A tag value with none of the recognised shapes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("tags must be a list or a mapping, found {0}")]
    UnexpectedShape(&'static str),

    #[error("tag record #{index} is not an object")]
    RecordNotObject { index: usize },

    #[error("tag record #{index} has no string 'key'")]
    MissingKey { index: usize },
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Convert a stored tag value into the canonical mapping.
///
/// Records are applied in order, so a duplicate key keeps the last value.
pub fn normalize(value: &Value) -> Result<TagMap, ShapeError> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::Array(records) => {
            let mut tags = TagMap::new();
            for (index, record) in records.iter().enumerate() {
                let Value::Object(record) = record else {
                    return Err(ShapeError::RecordNotObject { index });
                };
                let Some(Value::String(key)) = record.get("key") else {
                    return Err(ShapeError::MissingKey { index });
                };
                let value = record
                    .get("value")
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                tags.insert(key.clone(), value);
            }
            Ok(tags)
        }
        other => Err(ShapeError::UnexpectedShape(shape_name(other))),
    }
}

/// Expand a mapping into `{key, value, type: "MANAGED", provider}` records.
pub fn denormalize(tags: &TagMap, provider: &str) -> Vec<Value> {
    tags.iter()
        .map(|(key, value)| {
            let mut record = Map::new();
            record.insert("key".into(), Value::String(key.clone()));
            record.insert("value".into(), value.clone());
            record.insert("type".into(), Value::String(MANAGED_TAG_TYPE.into()));
            record.insert("provider".into(), Value::String(provider.into()));
            Value::Object(record)
        })
        .collect()
}

/// Any accepted shape, rewritten as the enriched record list for `provider`.
pub fn managed_tags(value: &Value, provider: &str) -> Result<Value, ShapeError> {
    let tags = normalize(value)?;
    Ok(Value::Array(denormalize(&tags, provider)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
