//! Read-transform-write over one collection.
//!
//! The step reads every selected document through a forward-only cursor,
//! asks its [`Transform`] what to do with each one, and submits all resulting
//! operations in a single bulk write once the cursor has been drained. A
//! document whose field already holds the target value yields no operation,
//! which is what makes a second run a no-op.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::{CancelToken, FailureKind, StepResult, StepTally};
use crate::catalog::CollectionRef;
use crate::document::{Document, DocumentId, Filter, Projection, ID_FIELD};
use crate::store::{DocumentStore, OpOutcome, WriteOp};
use crate::tags::{self, ShapeError};

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// What to do with one document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocAction {
    Skip,
    Set { field: String, value: Value },
    Delete,
}

pub type TransformFn = dyn Fn(&Document) -> Result<DocAction, ShapeError> + Send + Sync;

#[derive(Clone)]
pub enum Transform {
    /// Rewrite `field` as a canonical tag mapping.
    NormalizeTags { field: String },
    /// Rewrite `field` as MANAGED tag records, taking the provider from
    /// `provider_field` (empty string when absent).
    ManagedTags {
        field: String,
        provider_field: String,
    },
    /// Delete every selected document.
    Delete,
    Custom { name: String, f: Arc<TransformFn> },
}

impl Transform {
    pub fn normalize_tags() -> Self {
        Transform::NormalizeTags {
            field: "tags".into(),
        }
    }

    pub fn managed_tags() -> Self {
        Transform::ManagedTags {
            field: "tags".into(),
            provider_field: "provider".into(),
        }
    }

    pub fn custom<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Document) -> Result<DocAction, ShapeError> + Send + Sync + 'static,
    {
        Transform::Custom {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    /// Fields the transform reads; `None` means the whole document.
    fn reads(&self) -> Option<Vec<&str>> {
        match self {
            Transform::NormalizeTags { field } => Some(vec![field.as_str()]),
            Transform::ManagedTags {
                field,
                provider_field,
            } => Some(vec![field.as_str(), provider_field.as_str()]),
            Transform::Delete => Some(vec![ID_FIELD]),
            Transform::Custom { .. } => None,
        }
    }

    /// Decide the action for `doc`. An absent field is left alone.
    pub fn apply(&self, doc: &Document) -> Result<DocAction, ShapeError> {
        match self {
            Transform::NormalizeTags { field } => match doc.get(field) {
                None => Ok(DocAction::Skip),
                Some(value) => Ok(DocAction::Set {
                    field: field.clone(),
                    value: Value::Object(tags::normalize(value)?),
                }),
            },
            Transform::ManagedTags {
                field,
                provider_field,
            } => {
                let Some(value) = doc.get(field) else {
                    return Ok(DocAction::Skip);
                };
                let provider = doc
                    .get(provider_field)
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(DocAction::Set {
                    field: field.clone(),
                    value: tags::managed_tags(value, provider)?,
                })
            }
            Transform::Delete => Ok(DocAction::Delete),
            Transform::Custom { f, .. } => f(doc),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::NormalizeTags { field } => write!(f, "normalize '{field}' to a mapping"),
            Transform::ManagedTags {
                field,
                provider_field,
            } => write!(
                f,
                "rewrite '{field}' as MANAGED records with provider from '{provider_field}'"
            ),
            Transform::Delete => f.write_str("delete"),
            Transform::Custom { name, .. } => f.write_str(name),
        }
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Which documents of the target collection a batch step reads.
#[derive(Debug, Clone)]
pub enum Selector {
    Filter(Filter),
    /// Children whose `child_field` equals the `parent_field` of any parent
    /// matching one of `parent_filters`. Parent keys are deduplicated.
    ParentKeys {
        parent: CollectionRef,
        parent_filters: Vec<Filter>,
        parent_field: String,
        child_field: String,
    },
}

impl Selector {
    fn resolve(&self, store: &dyn DocumentStore) -> Result<Filter, String> {
        match self {
            Selector::Filter(filter) => Ok(filter.clone()),
            Selector::ParentKeys {
                parent,
                parent_filters,
                parent_field,
                child_field,
            } => {
                let projection = Projection::fields([parent_field.as_str()]);
                let mut keys: BTreeMap<String, Value> = BTreeMap::new();
                for filter in parent_filters {
                    let cursor = store
                        .find(&parent.namespace, &parent.collection, filter, &projection)
                        .map_err(|e| format!("parent lookup in {parent}: {e}"))?;
                    for doc in cursor {
                        let doc = doc.map_err(|e| format!("parent lookup in {parent}: {e}"))?;
                        match doc.get(parent_field) {
                            None | Some(Value::Null) => {}
                            Some(key) => {
                                keys.insert(key.to_string(), key.clone());
                            }
                        }
                    }
                }
                debug!(parent = %parent, keys = keys.len(), "resolved parent keys");
                Ok(Filter::field_in(
                    child_field.clone(),
                    keys.into_values().collect(),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BatchStep
// ---------------------------------------------------------------------------

pub struct BatchStep {
    pub(crate) name: String,
    pub(crate) target: CollectionRef,
    selector: Selector,
    projection: Projection,
    transform: Transform,
}

impl BatchStep {
    /// A step over every document of `target`, projected to the fields the
    /// transform reads.
    pub fn new(name: impl Into<String>, target: CollectionRef, transform: Transform) -> Self {
        let projection = match transform.reads() {
            Some(fields) => Projection::fields(fields),
            None => Projection::all(),
        };
        Self {
            name: name.into(),
            target,
            selector: Selector::Filter(Filter::all()),
            projection,
            transform,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.selector = Selector::Filter(filter);
        self
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    /// Narrow what is read. Fields the transform depends on are always kept.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        let projection = match self.transform.reads() {
            Some(fields) => projection.including(fields),
            None => projection,
        };
        self.projection = projection;
        self
    }

    pub(crate) fn touched(&self) -> Vec<&CollectionRef> {
        match &self.selector {
            Selector::Filter(_) => vec![&self.target],
            Selector::ParentKeys { parent, .. } => vec![&self.target, parent],
        }
    }

    pub fn describe(&self) -> String {
        match &self.selector {
            Selector::Filter(filter) if filter.is_empty() => format!("{}", self.transform),
            Selector::Filter(filter) => format!("{} where {}", self.transform, filter.as_json()),
            Selector::ParentKeys {
                parent,
                parent_filters,
                parent_field,
                child_field,
            } => format!(
                "{} where '{child_field}' is a '{parent_field}' of {parent} ({} parent filters)",
                self.transform,
                parent_filters.len()
            ),
        }
    }

    pub fn run(&self, store: &dyn DocumentStore, cancel: &CancelToken) -> StepResult {
        let mut tally = StepTally::begin(&self.name, &self.target);

        let ops = match self.plan(store, cancel, &mut tally) {
            Ok(ops) => ops,
            Err(reason) => {
                tally.error = Some(reason);
                return tally.finish();
            }
        };
        if ops.is_empty() {
            debug!(step = %self.name, scanned = tally.scanned, "nothing to write");
            return tally.finish();
        }

        tally.attempted = ops.len() as u64;
        debug!(step = %self.name, ops = ops.len(), "submitting bulk write");
        match store.bulk_write(&self.target.namespace, &self.target.collection, &ops) {
            Ok(outcomes) => {
                let returned = outcomes.len();
                for (op, outcome) in ops.iter().zip(outcomes) {
                    match outcome {
                        OpOutcome::Applied => tally.succeeded += 1,
                        OpOutcome::Rejected(reason) => {
                            tally.fail(Some(op.id().clone()), FailureKind::Rejected, reason)
                        }
                    }
                }
                for op in ops.iter().skip(returned) {
                    tally.fail(
                        Some(op.id().clone()),
                        FailureKind::Rejected,
                        "store returned no outcome for this operation",
                    );
                }
            }
            Err(e) => tally.error = Some(e.to_string()),
        }
        tally.finish()
    }

    /// Drain the cursor into a list of operations. The cursor is dropped
    /// before this returns, so no write overlaps an open read.
    fn plan(
        &self,
        store: &dyn DocumentStore,
        cancel: &CancelToken,
        tally: &mut StepTally,
    ) -> Result<Vec<WriteOp>, String> {
        let filter = self.selector.resolve(store)?;
        let cursor = store
            .find(
                &self.target.namespace,
                &self.target.collection,
                &filter,
                &self.projection,
            )
            .map_err(|e| e.to_string())?;

        let mut ops = Vec::new();
        for doc in cursor {
            if cancel.is_cancelled() {
                return Err("cancelled".into());
            }
            let doc = doc.map_err(|e| e.to_string())?;
            tally.scanned += 1;

            let Some(id) = DocumentId::of(&doc) else {
                tally.fail(None, FailureKind::MissingId, "document has no _id");
                continue;
            };
            match self.transform.apply(&doc) {
                Ok(DocAction::Skip) => {}
                Ok(DocAction::Set { field, value }) => {
                    if doc.get(&field) != Some(&value) {
                        ops.push(WriteOp::Set { id, field, value });
                    }
                }
                Ok(DocAction::Delete) => ops.push(WriteOp::Delete { id }),
                Err(e) => tally.fail(Some(id), FailureKind::MalformedShape, e.to_string()),
            }
        }
        Ok(ops)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
