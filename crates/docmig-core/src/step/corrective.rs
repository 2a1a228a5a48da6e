//! Whole-collection corrective writes delegated to the store.
//!
//! Only idempotent actions can be expressed: an [`Update`] carries `$set` and
//! `$unset` alone, and a delete by filter converges after one run.

use tracing::debug;

use super::{StepResult, StepTally};
use crate::catalog::CollectionRef;
use crate::document::{Filter, Update};
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq)]
pub enum CorrectiveAction {
    UpdateMany {
        filter: Filter,
        update: Update,
        upsert: bool,
    },
    DeleteMany {
        filter: Filter,
    },
}

pub struct CorrectiveStep {
    pub(crate) name: String,
    pub(crate) target: CollectionRef,
    action: CorrectiveAction,
}

impl CorrectiveStep {
    pub fn new(name: impl Into<String>, target: CollectionRef, action: CorrectiveAction) -> Self {
        Self {
            name: name.into(),
            target,
            action,
        }
    }

    pub fn update_many(
        name: impl Into<String>,
        target: CollectionRef,
        filter: Filter,
        update: Update,
        upsert: bool,
    ) -> Self {
        Self::new(
            name,
            target,
            CorrectiveAction::UpdateMany {
                filter,
                update,
                upsert,
            },
        )
    }

    pub fn delete_many(name: impl Into<String>, target: CollectionRef, filter: Filter) -> Self {
        Self::new(name, target, CorrectiveAction::DeleteMany { filter })
    }

    pub fn action(&self) -> &CorrectiveAction {
        &self.action
    }

    pub fn describe(&self) -> String {
        match &self.action {
            CorrectiveAction::UpdateMany {
                filter,
                update,
                upsert,
            } => {
                let fields: Vec<&str> = update.set.keys().map(String::as_str).collect();
                format!(
                    "update_many set [{}] where {}{}",
                    fields.join(", "),
                    filter.as_json(),
                    if *upsert { " (upsert)" } else { "" }
                )
            }
            CorrectiveAction::DeleteMany { filter } => {
                format!("delete_many where {}", filter.as_json())
            }
        }
    }

    pub fn run(&self, store: &dyn DocumentStore) -> StepResult {
        let mut tally = StepTally::begin(&self.name, &self.target);
        tally.attempted = 1;
        let ns = &self.target.namespace;
        let coll = &self.target.collection;

        match &self.action {
            CorrectiveAction::UpdateMany {
                filter,
                update,
                upsert,
            } => match store.update_many(ns, coll, filter, update, *upsert) {
                Ok(outcome) => {
                    debug!(
                        step = %self.name,
                        matched = outcome.matched,
                        modified = outcome.modified,
                        upserted = outcome.upserted,
                        "update_many applied"
                    );
                    tally.succeeded = 1;
                    tally.affected = outcome.matched + u64::from(outcome.upserted);
                }
                Err(e) => tally.error = Some(e.to_string()),
            },
            CorrectiveAction::DeleteMany { filter } => match store.delete_many(ns, coll, filter) {
                Ok(deleted) => {
                    debug!(step = %self.name, deleted, "delete_many applied");
                    tally.succeeded = 1;
                    tally.affected = deleted;
                }
                Err(e) => tally.error = Some(e.to_string()),
            },
        }
        tally.finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::document::{Document, DocumentId};
    use crate::error::StoreError;
    use crate::step::StepStatus;
    use crate::store::MemoryStore;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn service_accounts() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert("IDENTITY", "service_account", doc(json!({"_id": "sa1", "service_account_type": "TRUSTED"}))).unwrap();
        store.insert("IDENTITY", "service_account", doc(json!({"_id": "sa2"}))).unwrap();
        store.insert("IDENTITY", "service_account", doc(json!({"_id": "sa3", "service_account_type": "USER"}))).unwrap();
        store
    }

    fn backfill() -> CorrectiveStep {
        CorrectiveStep::update_many(
            "service_account_backfill",
            Catalog::builtin().resolve("IDENTITY", "service_account").unwrap(),
            Filter::from_json(json!({"service_account_type": {"$ne": "TRUSTED"}})).unwrap(),
            Update::from_json(json!({"$set": {"service_account_type": "GENERAL", "scope": "PROJECT"}}))
                .unwrap(),
            true,
        )
    }

    #[test]
    fn update_many_backfills_and_is_idempotent() {
        let store = service_accounts();
        let step = backfill();

        let first = step.run(&store);
        assert_eq!(first.status(), StepStatus::Complete);
        assert_eq!(first.affected, 2);

        let sa2 = store.get("IDENTITY", "service_account", &DocumentId::new("sa2")).unwrap();
        assert_eq!(sa2["service_account_type"], json!("GENERAL"));
        assert_eq!(sa2["scope"], json!("PROJECT"));
        let sa1 = store.get("IDENTITY", "service_account", &DocumentId::new("sa1")).unwrap();
        assert!(sa1.get("scope").is_none());

        let before = store.documents("IDENTITY", "service_account");
        let second = step.run(&store);
        assert_eq!(second.status(), StepStatus::Complete);
        assert_eq!(store.documents("IDENTITY", "service_account"), before);
    }

    #[test]
    fn delete_many_reports_deleted_count() {
        let store = service_accounts();
        let step = CorrectiveStep::delete_many(
            "drop_trusted",
            Catalog::builtin().resolve("IDENTITY", "service_account").unwrap(),
            Filter::from_json(json!({"service_account_type": "TRUSTED"})).unwrap(),
        );
        assert_eq!(step.run(&store).affected, 1);
        assert_eq!(step.run(&store).affected, 0);
        assert_eq!(store.documents("IDENTITY", "service_account").len(), 2);
    }

    #[test]
    fn store_failure_becomes_step_error() {
        let store = service_accounts();
        store.set_unavailable(
            "IDENTITY",
            "service_account",
            StoreError::Unavailable("connection refused".into()),
        );
        let result = backfill().run(&store);
        assert_eq!(result.status(), StepStatus::Failed);
        assert_eq!(result.succeeded, 0);
        assert!(result.error.unwrap().contains("connection refused"));
    }

    #[test]
    fn describe_mentions_upsert() {
        let text = backfill().describe();
        assert!(text.starts_with("update_many set [scope, service_account_type]"));
        assert!(text.ends_with("(upsert)"));
    }
}
