//! Documents and the small Mongo-style query surface the migrations need.
//!
//! A [`Document`] is an untyped JSON object keyed by its `_id` field. The
//! [`Filter`], [`Projection`] and [`Update`] types cover exactly the operators
//! used by the migration steps: equality, `$eq`, `$ne`, `$in`, `$nin` and
//! `$exists` for reads; `$set` and `$unset` for writes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MigrateError, Result};

pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";

// ---------------------------------------------------------------------------
// DocumentId
// ---------------------------------------------------------------------------

/// Storage key for a document's `_id`.
///
/// String ids are kept verbatim unless they start with `$`. Any other JSON
/// value, and a string starting with `$`, is encoded as `$` followed by its
/// compact JSON text, so `42` and `"42"` map to different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

const ENCODED_PREFIX: char = '$';

impl DocumentId {
    /// Key for a string `_id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self::from_value(&Value::String(id.into()))
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) if !s.starts_with(ENCODED_PREFIX) => Self(s.clone()),
            other => Self(format!("{ENCODED_PREFIX}{other}")),
        }
    }

    /// Identifier of `doc`, or `None` when `_id` is absent or null.
    pub fn of(doc: &Document) -> Option<Self> {
        match doc.get(ID_FIELD) {
            None | Some(Value::Null) => None,
            Some(v) => Some(Self::from_value(v)),
        }
    }

    /// The `_id` value this key was built from.
    pub fn to_value(&self) -> Value {
        match self.0.strip_prefix(ENCODED_PREFIX) {
            Some(json) => {
                serde_json::from_str(json).unwrap_or_else(|_| Value::String(self.0.clone()))
            }
            None => Value::String(self.0.clone()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

const FILTER_OPERATORS: &[&str] = &["$eq", "$ne", "$in", "$nin", "$exists"];

/// Top-level field conditions, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Map<String, Value>);

impl Filter {
    /// Matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a filter from a JSON object, rejecting operators outside the
    /// supported subset.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(MigrateError::InvalidFilter(format!(
                "expected an object, got {value}"
            )));
        };
        for (field, condition) in &map {
            if field.starts_with('$') {
                return Err(MigrateError::InvalidFilter(format!(
                    "top-level operator '{field}' is not supported"
                )));
            }
            if let Value::Object(ops) = condition {
                for op in ops.keys().filter(|k| k.starts_with('$')) {
                    if !FILTER_OPERATORS.contains(&op.as_str()) {
                        return Err(MigrateError::InvalidFilter(format!(
                            "operator '{op}' on field '{field}' is not supported"
                        )));
                    }
                }
            }
        }
        Ok(Self(map))
    }

    /// `{field: {"$in": values}}`
    pub fn field_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        let mut cond = Map::new();
        cond.insert("$in".into(), Value::Array(values));
        let mut map = Map::new();
        map.insert(field.into(), Value::Object(cond));
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0
            .iter()
            .all(|(field, condition)| condition_matches(doc.get(field), condition))
    }

    /// Plain `field: value` pairs, used to seed an upserted document.
    pub fn equalities(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter().filter_map(|(field, condition)| match condition {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                ops.get("$eq").map(|v| (field, v))
            }
            other => Some((field, other)),
        })
    }

    pub fn as_json(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn condition_matches(actual: Option<&Value>, condition: &Value) -> bool {
    let Value::Object(ops) = condition else {
        return actual == Some(condition);
    };
    if !ops.keys().any(|k| k.starts_with('$')) {
        return actual == Some(condition);
    }
    ops.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => actual == Some(operand),
        // Absent fields satisfy $ne, as in Mongo.
        "$ne" => actual != Some(operand),
        "$in" => match operand {
            Value::Array(values) => values.contains(actual.unwrap_or(&Value::Null)),
            _ => false,
        },
        "$nin" => match operand {
            Value::Array(values) => !values.contains(actual.unwrap_or(&Value::Null)),
            _ => true,
        },
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Inclusion-only projection. `_id` is always kept; an empty projection keeps
/// the whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Projection(Vec<String>);

impl Projection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// Add `fields` to a field list. A projection that keeps everything is
    /// returned unchanged.
    pub fn including<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        if self.0.is_empty() {
            return self;
        }
        for field in fields {
            if !self.0.iter().any(|f| f == field) {
                self.0.push(field.to_string());
            }
        }
        self
    }

    pub fn apply(&self, doc: &Document) -> Document {
        if self.0.is_empty() {
            return doc.clone();
        }
        doc.iter()
            .filter(|(k, _)| k.as_str() == ID_FIELD || self.0.iter().any(|f| f == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// An idempotent update: `$set` and `$unset` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub set: Map<String, Value>,
    #[serde(default)]
    pub unset: Vec<String>,
}

impl Update {
    pub fn set<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            set: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            unset: Vec::new(),
        }
    }

    /// Parse a Mongo-style update document. Operators that would change the
    /// result on re-application (`$inc`, `$push`, ...) are refused.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(ops) = value else {
            return Err(MigrateError::InvalidUpdate(format!(
                "expected an object, got {value}"
            )));
        };
        let mut update = Update::default();
        for (op, body) in ops {
            let Value::Object(fields) = body else {
                return Err(MigrateError::InvalidUpdate(format!(
                    "'{op}' must map to an object"
                )));
            };
            match op.as_str() {
                "$set" => update.set.extend(fields),
                "$unset" => update.unset.extend(fields.into_iter().map(|(k, _)| k)),
                other if other.starts_with('$') => {
                    return Err(MigrateError::NonIdempotentUpdate(other.to_string()))
                }
                other => {
                    return Err(MigrateError::InvalidUpdate(format!(
                        "replacement documents are not supported (field '{other}')"
                    )))
                }
            }
        }
        if update.set.contains_key(ID_FIELD) || update.unset.iter().any(|f| f == ID_FIELD) {
            return Err(MigrateError::InvalidUpdate("'_id' cannot be modified".into()));
        }
        Ok(update)
    }

    /// Apply to `doc`; returns whether anything changed.
    pub fn apply(&self, doc: &mut Document) -> bool {
        let mut changed = false;
        for (field, value) in &self.set {
            if doc.get(field) != Some(value) {
                doc.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        for field in &self.unset {
            changed |= doc.remove(field).is_some();
        }
        changed
    }

    /// Document inserted by an upsert that matched nothing: the filter's
    /// equality fields, then the `$set` fields, under a fresh `_id`.
    pub fn upsert_document(&self, filter: &Filter, id: DocumentId) -> Document {
        let mut doc = Document::new();
        doc.insert(ID_FIELD.into(), id.to_value());
        for (field, value) in filter.equalities() {
            doc.insert(field.clone(), value.clone());
        }
        self.apply(&mut doc);
        doc
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn document_id_keeps_numeric_and_string_ids_apart() {
        let ids = [json!(42), json!("42"), json!("$42"), json!({"oid": "42"}), json!(true)];
        let keys: std::collections::BTreeSet<DocumentId> =
            ids.iter().map(DocumentId::from_value).collect();
        assert_eq!(keys.len(), ids.len());
        for id in &ids {
            assert_eq!(&DocumentId::from_value(id).to_value(), id);
        }
    }

    #[test]
    fn document_id_keeps_strings_and_encodes_others() {
        assert_eq!(DocumentId::from_value(&json!("abc")).as_str(), "abc");
        assert_eq!(DocumentId::from_value(&json!(42)).as_str(), "$42");
        assert_eq!(DocumentId::new("$set").as_str(), "$\"$set\"");
        assert!(DocumentId::of(&doc(json!({"_id": null}))).is_none());
        assert!(DocumentId::of(&doc(json!({"name": "x"}))).is_none());
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::all().matches(&doc(json!({"_id": "1"}))));
    }

    #[test]
    fn equality_and_operator_conditions() {
        let f = Filter::from_json(json!({
            "provider": "aws",
            "cloud_service_type": {"$in": ["Policy", "Group"]}
        }))
        .unwrap();
        assert!(f.matches(&doc(json!({"provider": "aws", "cloud_service_type": "Group"}))));
        assert!(!f.matches(&doc(json!({"provider": "aws", "cloud_service_type": "Role"}))));
        assert!(!f.matches(&doc(json!({"provider": "azure", "cloud_service_type": "Group"}))));
    }

    #[test]
    fn ne_matches_absent_field() {
        let f = Filter::from_json(json!({"service_account_type": {"$ne": "TRUSTED"}})).unwrap();
        assert!(f.matches(&doc(json!({"_id": "1"}))));
        assert!(f.matches(&doc(json!({"service_account_type": "GENERAL"}))));
        assert!(!f.matches(&doc(json!({"service_account_type": "TRUSTED"}))));
    }

    #[test]
    fn exists_operator() {
        let f = Filter::from_json(json!({"tags": {"$exists": false}})).unwrap();
        assert!(f.matches(&doc(json!({"_id": "1"}))));
        assert!(!f.matches(&doc(json!({"tags": []}))));
    }

    #[test]
    fn unsupported_filter_operator_is_rejected() {
        let err = Filter::from_json(json!({"n": {"$regex": "x"}})).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidFilter(_)));
        let err = Filter::from_json(json!({"$or": []})).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidFilter(_)));
    }

    #[test]
    fn projection_keeps_id_and_listed_fields() {
        let p = Projection::fields(["tags"]);
        let out = p.apply(&doc(json!({"_id": "1", "tags": [], "name": "n"})));
        assert_eq!(Value::Object(out), json!({"_id": "1", "tags": []}));
    }

    #[test]
    fn including_extends_field_lists_only() {
        let p = Projection::fields(["name"]).including(["tags", "name"]);
        let out = p.apply(&doc(json!({"_id": "1", "tags": [], "name": "n", "other": 1})));
        assert_eq!(Value::Object(out), json!({"_id": "1", "tags": [], "name": "n"}));
        assert_eq!(Projection::all().including(["tags"]), Projection::all());
    }

    #[test]
    fn update_rejects_non_idempotent_operators() {
        let err = Update::from_json(json!({"$inc": {"n": 1}})).unwrap_err();
        assert!(matches!(err, MigrateError::NonIdempotentUpdate(op) if op == "$inc"));
        let err = Update::from_json(json!({"name": "replaced"})).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidUpdate(_)));
    }

    #[test]
    fn update_apply_reports_changes_once() {
        let u = Update::from_json(json!({"$set": {"scope": "PROJECT"}, "$unset": {"old": ""}}))
            .unwrap();
        let mut d = doc(json!({"_id": "1", "old": true}));
        assert!(u.apply(&mut d));
        assert!(!u.apply(&mut d));
        assert_eq!(Value::Object(d), json!({"_id": "1", "scope": "PROJECT"}));
    }

    #[test]
    fn upsert_document_combines_filter_equalities_and_set() {
        let f = Filter::from_json(json!({"kind": "a", "n": {"$ne": 3}, "m": {"$eq": 1}})).unwrap();
        let u = Update::set([("scope", json!("PROJECT"))]);
        let d = u.upsert_document(&f, DocumentId::new("new-id"));
        assert_eq!(
            Value::Object(d),
            json!({"_id": "new-id", "kind": "a", "m": 1, "scope": "PROJECT"})
        );
    }
}
