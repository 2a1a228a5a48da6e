//! On-disk document store using redb.
//!
//! # Table design
//!
//! One table per collection, named `"<namespace>/<collection>"`:
//! ```text
//! key:   _id as a string (see DocumentId)
//! value: JSON-encoded document
//! ```
//!
//! A missing table reads as an empty collection and is created on first
//! write. Cursors page through the table in key order, `page_size` entries per
//! read transaction, resuming strictly after the last key seen; a long scan
//! therefore never pins one read transaction for its whole duration.

use std::collections::VecDeque;
use std::fmt::Display;
use std::ops::Bound;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, TableError};
use uuid::Uuid;

use super::{missing, Cursor, DocumentStore, OpOutcome, UpdateOutcome, WriteOp};
use crate::document::{Document, DocumentId, Filter, Projection, Update};
use crate::error::{MigrateError, Result, StoreError};

pub const DEFAULT_PAGE_SIZE: usize = 500;

// ---------------------------------------------------------------------------
// Table helpers
// ---------------------------------------------------------------------------

fn table_name(namespace: &str, collection: &str) -> String {
    format!("{namespace}/{collection}")
}

fn table_def(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

fn backend(e: impl Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn decode(bytes: &[u8]) -> std::result::Result<Document, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

fn encode(doc: &Document) -> std::result::Result<Vec<u8>, StoreError> {
    serde_json::to_vec(doc).map_err(|e| StoreError::Codec(e.to_string()))
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
    page_size: usize,
}

impl RedbStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(backend)?;
        Ok(Self {
            db,
            page_size: page_size.max(1),
        })
    }

    /// Insert or replace documents in one write transaction.
    pub fn insert_many(
        &self,
        namespace: &str,
        collection: &str,
        docs: &[Document],
    ) -> Result<Vec<DocumentId>> {
        let mut encoded = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = DocumentId::of(doc)
                .ok_or_else(|| MigrateError::InvalidDocument("document has no _id".into()))?;
            encoded.push((id, encode(doc)?));
        }

        let name = table_name(namespace, collection);
        let wt = self.db.begin_write().map_err(backend)?;
        {
            let mut table = wt.open_table(table_def(&name)).map_err(backend)?;
            for (id, bytes) in &encoded {
                table
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(backend)?;
            }
        }
        wt.commit().map_err(backend)?;
        Ok(encoded.into_iter().map(|(id, _)| id).collect())
    }

    /// Every document of a collection, in id order.
    pub fn documents(&self, namespace: &str, collection: &str) -> Result<Vec<Document>> {
        let docs = self
            .find(namespace, collection, &Filter::all(), &Projection::all())?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    /// Read-modify-write over all documents matching `filter`.
    ///
    /// `edit` returns whether it changed the document; only changed documents
    /// are written back. Returns `(matched, modified)`.
    fn rewrite_matching(
        &self,
        name: &str,
        filter: &Filter,
        mut edit: impl FnMut(&mut Document) -> bool,
        upsert: Option<Document>,
    ) -> std::result::Result<(u64, u64, bool), StoreError> {
        let wt = self.db.begin_write().map_err(backend)?;
        let (matched, modified, upserted) = {
            let mut table = wt.open_table(table_def(name)).map_err(backend)?;
            let mut hits: Vec<(String, Document)> = Vec::new();
            for entry in table.iter().map_err(backend)? {
                let (k, v) = entry.map_err(backend)?;
                let doc = decode(v.value())?;
                if filter.matches(&doc) {
                    hits.push((k.value().to_string(), doc));
                }
            }

            let matched = hits.len() as u64;
            let mut modified = 0;
            for (key, mut doc) in hits {
                if edit(&mut doc) {
                    table
                        .insert(key.as_str(), encode(&doc)?.as_slice())
                        .map_err(backend)?;
                    modified += 1;
                }
            }

            let mut upserted = false;
            if matched == 0 {
                if let Some(doc) = upsert {
                    let id = DocumentId::of(&doc)
                        .ok_or_else(|| StoreError::Codec("upserted document has no _id".into()))?;
                    table
                        .insert(id.as_str(), encode(&doc)?.as_slice())
                        .map_err(backend)?;
                    upserted = true;
                }
            }
            (matched, modified, upserted)
        };
        wt.commit().map_err(backend)?;
        Ok((matched, modified, upserted))
    }
}

impl DocumentStore for RedbStore {
    fn find<'a>(
        &'a self,
        namespace: &str,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
    ) -> std::result::Result<Cursor<'a>, StoreError> {
        Ok(Box::new(PagedCursor {
            db: &self.db,
            table: table_name(namespace, collection),
            filter: filter.clone(),
            projection: projection.clone(),
            page_size: self.page_size,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn bulk_write(
        &self,
        namespace: &str,
        collection: &str,
        ops: &[WriteOp],
    ) -> std::result::Result<Vec<OpOutcome>, StoreError> {
        let name = table_name(namespace, collection);
        let wt = self.db.begin_write().map_err(backend)?;
        let mut outcomes = Vec::with_capacity(ops.len());
        {
            let mut table = wt.open_table(table_def(&name)).map_err(backend)?;
            for op in ops {
                let id = op.id().as_str();
                let outcome = match op {
                    WriteOp::Set { field, value, .. } => {
                        let current = table
                            .get(id)
                            .map_err(backend)?
                            .map(|guard| guard.value().to_vec());
                        match current {
                            None => missing(op.id()),
                            Some(bytes) => match decode(&bytes) {
                                Ok(mut doc) => {
                                    doc.insert(field.clone(), value.clone());
                                    table
                                        .insert(id, encode(&doc)?.as_slice())
                                        .map_err(backend)?;
                                    OpOutcome::Applied
                                }
                                Err(e) => OpOutcome::Rejected(e.to_string()),
                            },
                        }
                    }
                    WriteOp::Delete { .. } => match table.remove(id).map_err(backend)? {
                        Some(_) => OpOutcome::Applied,
                        None => missing(op.id()),
                    },
                };
                outcomes.push(outcome);
            }
        }
        wt.commit().map_err(backend)?;
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
        let seed = upsert.then(|| {
            update.upsert_document(filter, DocumentId::new(Uuid::new_v4().to_string()))
        });
        let (matched, modified, upserted) = self.rewrite_matching(
            &table_name(namespace, collection),
            filter,
            |doc| update.apply(doc),
            seed,
        )?;
        Ok(UpdateOutcome {
            matched,
            modified,
            upserted,
        })
    }

    fn delete_many(
        &self,
        namespace: &str,
        collection: &str,
        filter: &Filter,
    ) -> std::result::Result<u64, StoreError> {
        let name = table_name(namespace, collection);
        let wt = self.db.begin_write().map_err(backend)?;
        let deleted = {
            let mut table = wt.open_table(table_def(&name)).map_err(backend)?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(backend)? {
                let (k, v) = entry.map_err(backend)?;
                if filter.matches(&decode(v.value())?) {
                    keys.push(k.value().to_string());
                }
            }
            for key in &keys {
                table.remove(key.as_str()).map_err(backend)?;
            }
            keys.len() as u64
        };
        wt.commit().map_err(backend)?;
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// PagedCursor
// ---------------------------------------------------------------------------

struct PagedCursor<'a> {
    db: &'a Database,
    table: String,
    filter: Filter,
    projection: Projection,
    page_size: usize,
    after: Option<String>,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl PagedCursor<'_> {
    fn fill(&mut self) -> std::result::Result<(), StoreError> {
        let rt = self.db.begin_read().map_err(backend)?;
        let table = match rt.open_table(table_def(&self.table)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => {
                self.exhausted = true;
                return Ok(());
            }
            Err(e) => return Err(backend(e)),
        };

        let after = self.after.clone();
        let lower = match after.as_deref() {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let mut read = 0;
        for entry in table
            .range::<&str>((lower, Bound::Unbounded))
            .map_err(backend)?
        {
            let (k, v) = entry.map_err(backend)?;
            self.after = Some(k.value().to_string());
            let doc = decode(v.value())?;
            if self.filter.matches(&doc) {
                self.buffer.push_back(self.projection.apply(&doc));
            }
            read += 1;
            if read >= self.page_size {
                break;
            }
        }
        if read < self.page_size {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for PagedCursor<'_> {
    type Item = std::result::Result<Document, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return Some(Ok(doc));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
