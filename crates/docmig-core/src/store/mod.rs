//! The document store the migrations run against.
//!
//! Steps only ever see the [`DocumentStore`] trait. Two implementations ship
//! with the crate: [`MemoryStore`] for fixtures and [`RedbStore`] for an
//! on-disk database.

pub mod disk;
pub mod memory;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, DocumentId, Filter, Projection, Update};
use crate::error::StoreError;

pub use disk::RedbStore;
pub use memory::MemoryStore;

/// Lazy, forward-only sequence of documents returned by [`DocumentStore::find`].
pub type Cursor<'a> = Box<dyn Iterator<Item = Result<Document, StoreError>> + 'a>;

/// One operation of a bulk write, addressed by the identifier captured at
/// read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    Set {
        id: DocumentId,
        field: String,
        value: Value,
    },
    Delete {
        id: DocumentId,
    },
}

impl WriteOp {
    pub fn id(&self) -> &DocumentId {
        match self {
            WriteOp::Set { id, .. } | WriteOp::Delete { id } => id,
        }
    }
}

/// Outcome of one operation inside a bulk write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum OpOutcome {
    Applied,
    Rejected(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

/// The store surface consumed by migration steps.
///
/// A bulk write is not atomic across operations: the returned list has one
/// [`OpOutcome`] per input operation, in order, and a rejected operation does
/// not prevent its siblings from applying. An `Err` means the call as a whole
/// failed (unreachable store, timeout) and nothing can be assumed applied.
pub trait DocumentStore: Send + Sync {
    fn find<'a>(
        &'a self,
        namespace: &str,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Cursor<'a>, StoreError>;

    fn bulk_write(
        &self,
        namespace: &str,
        collection: &str,
        ops: &[WriteOp],
    ) -> Result<Vec<OpOutcome>, StoreError>;

    fn update_many(
        &self,
        namespace: &str,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError>;

    fn delete_many(
        &self,
        namespace: &str,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError>;
}

/// Rejection reported when an operation's target no longer exists.
pub(crate) fn missing(id: &DocumentId) -> OpOutcome {
    OpOutcome::Rejected(format!("no document with _id '{id}'"))
}
