//! In-process document store for fixtures and tests.
//!
//! Collections are id-ordered maps behind a single `RwLock`. `find` takes a
//! snapshot of the matching documents, so a cursor never observes writes
//! issued after it was opened. Faults can be injected per collection
//! ([`MemoryStore::set_unavailable`]) and per document
//! ([`MemoryStore::reject_id`]).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

use uuid::Uuid;

use super::{missing, Cursor, DocumentStore, OpOutcome, UpdateOutcome, WriteOp};
use crate::document::{Document, DocumentId, Filter, Projection, Update};
use crate::error::{MigrateError, Result, StoreError};

type CollectionKey = (String, String);
type Collection = BTreeMap<DocumentId, Document>;

fn key(namespace: &str, collection: &str) -> CollectionKey {
    (namespace.to_string(), collection.to_string())
}

#[derive(Default)]
struct Faults {
    unavailable: HashMap<CollectionKey, StoreError>,
    rejected: HashSet<DocumentId>,
}

/// A bulk write as seen by the store: target collection and op count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCall {
    pub namespace: String,
    pub collection: String,
    pub ops: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<CollectionKey, Collection>>,
    faults: Mutex<Faults>,
    bulk_calls: Mutex<Vec<BulkCall>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document. The document must carry an `_id`.
    pub fn insert(&self, namespace: &str, collection: &str, doc: Document) -> Result<DocumentId> {
        let id = DocumentId::of(&doc)
            .ok_or_else(|| MigrateError::InvalidDocument("document has no _id".into()))?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(key(namespace, collection))
            .or_default()
            .insert(id.clone(), doc);
        Ok(id)
    }

    pub fn get(&self, namespace: &str, collection: &str, id: &DocumentId) -> Option<Document> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .get(&key(namespace, collection))
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// All documents of a collection in id order.
    pub fn documents(&self, namespace: &str, collection: &str) -> Vec<Document> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .get(&key(namespace, collection))
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make every call on the collection fail with `error` until cleared.
    pub fn set_unavailable(&self, namespace: &str, collection: &str, error: StoreError) {
        self.faults()
            .unavailable
            .insert(key(namespace, collection), error);
    }

    pub fn clear_unavailable(&self, namespace: &str, collection: &str) {
        self.faults().unavailable.remove(&key(namespace, collection));
    }

    /// Reject any bulk operation addressed to `id`.
    pub fn reject_id(&self, id: DocumentId) {
        self.faults().rejected.insert(id);
    }

    pub fn bulk_calls(&self) -> Vec<BulkCall> {
        self.bulk_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self, namespace: &str, collection: &str) -> std::result::Result<(), StoreError> {
        match self.faults().unavailable.get(&key(namespace, collection)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl DocumentStore for MemoryStore {
    fn find<'a>(
        &'a self,
        namespace: &str,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
    ) -> std::result::Result<Cursor<'a>, StoreError> {
        self.check_available(namespace, collection)?;
        let snapshot: Vec<Document> = self
            .documents(namespace, collection)
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .map(|doc| projection.apply(&doc))
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn bulk_write(
        &self,
        namespace: &str,
        collection: &str,
        ops: &[WriteOp],
    ) -> std::result::Result<Vec<OpOutcome>, StoreError> {
        self.check_available(namespace, collection)?;
        self.bulk_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(BulkCall {
                namespace: namespace.to_string(),
                collection: collection.to_string(),
                ops: ops.len(),
            });

        let rejected = self.faults().rejected.clone();
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let docs = collections.entry(key(namespace, collection)).or_default();

        let outcomes = ops
            .iter()
            .map(|op| {
                if rejected.contains(op.id()) {
                    return OpOutcome::Rejected(format!("operation on '{}' refused", op.id()));
                }
                match op {
                    WriteOp::Set { id, field, value } => match docs.get_mut(id) {
                        Some(doc) => {
                            doc.insert(field.clone(), value.clone());
                            OpOutcome::Applied
                        }
                        None => missing(id),
                    },
                    WriteOp::Delete { id } => match docs.remove(id) {
                        Some(_) => OpOutcome::Applied,
                        None => missing(id),
                    },
                }
            })
            .collect();
        Ok(outcomes)
    }

    fn update_many(
        &self,
        namespace: &str,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> std::result::Result<UpdateOutcome, StoreError> {
        self.check_available(namespace, collection)?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let docs = collections.entry(key(namespace, collection)).or_default();

        let mut outcome = UpdateOutcome::default();
        for doc in docs.values_mut().filter(|doc| filter.matches(doc)) {
            outcome.matched += 1;
            if update.apply(doc) {
                outcome.modified += 1;
            }
        }
        if outcome.matched == 0 && upsert {
            let id = DocumentId::new(Uuid::new_v4().to_string());
            docs.insert(id.clone(), update.upsert_document(filter, id));
            outcome.upserted = true;
        }
        Ok(outcome)
    }

    fn delete_many(
        &self,
        namespace: &str,
        collection: &str,
        filter: &Filter,
    ) -> std::result::Result<u64, StoreError> {
        self.check_available(namespace, collection)?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = collections.get_mut(&key(namespace, collection)) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|_, doc| !filter.matches(doc));
        Ok((before - docs.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert("INVENTORY", "region", doc(json!({"_id": "r1", "provider": "aws"}))).unwrap();
        store.insert("INVENTORY", "region", doc(json!({"_id": "r2", "provider": "azure"}))).unwrap();
        store
    }

    #[test]
    fn insert_requires_id() {
        let store = MemoryStore::new();
        let err = store.insert("A", "b", doc(json!({"name": "x"}))).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidDocument(_)));
    }

    #[test]
    fn numeric_and_string_ids_are_distinct_documents() {
        let store = MemoryStore::new();
        store.insert("A", "b", doc(json!({"_id": 42, "kind": "number"}))).unwrap();
        store.insert("A", "b", doc(json!({"_id": "42", "kind": "string"}))).unwrap();
        assert_eq!(store.documents("A", "b").len(), 2);

        let ops = vec![WriteOp::Delete { id: DocumentId::from_value(&json!(42)) }];
        store.bulk_write("A", "b", &ops).unwrap();
        let left = store.documents("A", "b");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["kind"], json!("string"));
    }

    #[test]
    fn find_applies_filter_and_projection() {
        let store = seeded();
        let filter = Filter::from_json(json!({"provider": "aws"})).unwrap();
        let docs: Vec<Document> = store
            .find("INVENTORY", "region", &filter, &Projection::fields(["tags"]))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(Value::Object(docs[0].clone()), json!({"_id": "r1"}));
    }

    #[test]
    fn bulk_write_rejects_missing_ids_without_aborting_siblings() {
        let store = seeded();
        let ops = vec![
            WriteOp::Set { id: DocumentId::new("r1"), field: "tags".into(), value: json!({}) },
            WriteOp::Delete { id: DocumentId::new("gone") },
            WriteOp::Delete { id: DocumentId::new("r2") },
        ];
        let outcomes = store.bulk_write("INVENTORY", "region", &ops).unwrap();
        assert_eq!(outcomes[0], OpOutcome::Applied);
        assert!(matches!(&outcomes[1], OpOutcome::Rejected(r) if r.contains("gone")));
        assert_eq!(outcomes[2], OpOutcome::Applied);
        assert_eq!(store.documents("INVENTORY", "region").len(), 1);
        assert_eq!(store.bulk_calls().len(), 1);
    }

    #[test]
    fn unavailable_collection_fails_every_call() {
        let store = seeded();
        store.set_unavailable("INVENTORY", "region", StoreError::Timeout(50));
        assert!(matches!(
            store.find("INVENTORY", "region", &Filter::all(), &Projection::all()),
            Err(StoreError::Timeout(50))
        ));
        assert!(store.delete_many("INVENTORY", "region", &Filter::all()).is_err());
        store.clear_unavailable("INVENTORY", "region");
        assert_eq!(store.delete_many("INVENTORY", "region", &Filter::all()).unwrap(), 2);
    }

    #[test]
    fn update_many_upserts_only_when_nothing_matched() {
        let store = seeded();
        let filter = Filter::from_json(json!({"provider": "gcp"})).unwrap();
        let update = Update::set([("scope", json!("PROJECT"))]);

        let first = store.update_many("INVENTORY", "region", &filter, &update, true).unwrap();
        assert!(first.upserted);
        assert_eq!(store.documents("INVENTORY", "region").len(), 3);

        let second = store.update_many("INVENTORY", "region", &filter, &update, true).unwrap();
        assert!(!second.upserted);
        assert_eq!(second.matched, 1);
        assert_eq!(second.modified, 0);
        assert_eq!(store.documents("INVENTORY", "region").len(), 3);
    }
}
