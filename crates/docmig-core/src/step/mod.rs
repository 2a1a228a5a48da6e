//! Migration steps and their results.
//!
//! A [`Step`] targets exactly one collection and produces exactly one
//! [`StepResult`]. Steps never return `Err`: document-level problems are
//! collected into `failures`, and call-level problems (unreachable store,
//! timeout, cancellation) into `error`, so the caller can always continue
//! with the next step.

pub mod batch;
pub mod corrective;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::CollectionRef;
use crate::document::DocumentId;
use crate::store::DocumentStore;

pub use batch::{BatchStep, DocAction, Selector, Transform};
pub use corrective::{CorrectiveAction, CorrectiveStep};

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation, checked between documents and between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The document's field had none of the accepted shapes.
    MalformedShape,
    /// The document could not be addressed (no `_id`).
    MissingId,
    /// The store refused this operation inside a bulk write.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub id: Option<DocumentId>,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Complete,
    Partial,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepStatus::Complete => "complete",
            StepStatus::Partial => "partial",
            StepStatus::Failed => "failed",
        })
    }
}

/// Final, read-only record of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub target: CollectionRef,
    /// Documents read from the cursor.
    pub scanned: u64,
    /// Operations submitted to the store.
    pub attempted: u64,
    pub succeeded: u64,
    /// Documents matched or deleted by a corrective action.
    pub affected: u64,
    pub failures: Vec<StepFailure>,
    /// Call-level failure; when set, nothing from this step was applied.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn status(&self) -> StepStatus {
        if self.error.is_some() {
            StepStatus::Failed
        } else if self.failures.is_empty() {
            StepStatus::Complete
        } else {
            StepStatus::Partial
        }
    }

    pub fn failure_count(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }
}

/// Mutable accumulator a step fills in while running; sealed into a
/// [`StepResult`] by [`StepTally::finish`].
pub(crate) struct StepTally {
    step: String,
    target: CollectionRef,
    pub scanned: u64,
    pub attempted: u64,
    pub succeeded: u64,
    pub affected: u64,
    pub failures: Vec<StepFailure>,
    pub error: Option<String>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl StepTally {
    pub fn begin(step: &str, target: &CollectionRef) -> Self {
        Self {
            step: step.to_string(),
            target: target.clone(),
            scanned: 0,
            attempted: 0,
            succeeded: 0,
            affected: 0,
            failures: Vec::new(),
            error: None,
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn fail(&mut self, id: Option<DocumentId>, kind: FailureKind, message: impl Into<String>) {
        self.failures.push(StepFailure {
            id,
            kind,
            message: message.into(),
        });
    }

    pub fn finish(self) -> StepResult {
        StepResult {
            step: self.step,
            target: self.target,
            scanned: self.scanned,
            attempted: self.attempted,
            succeeded: self.succeeded,
            affected: self.affected,
            failures: self.failures,
            error: self.error,
            started_at: self.started_at,
            duration_ms: self.clock.elapsed().as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

pub enum Step {
    Batch(BatchStep),
    Corrective(CorrectiveStep),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Batch(s) => &s.name,
            Step::Corrective(s) => &s.name,
        }
    }

    /// The collection this step writes to.
    pub fn target(&self) -> &CollectionRef {
        match self {
            Step::Batch(s) => &s.target,
            Step::Corrective(s) => &s.target,
        }
    }

    /// Every collection this step reads or writes.
    pub fn touched(&self) -> Vec<&CollectionRef> {
        match self {
            Step::Batch(s) => s.touched(),
            Step::Corrective(s) => vec![&s.target],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Batch(_) => "batch",
            Step::Corrective(_) => "corrective",
        }
    }

    /// One-line summary of what the step does.
    pub fn describe(&self) -> String {
        match self {
            Step::Batch(s) => s.describe(),
            Step::Corrective(s) => s.describe(),
        }
    }

    pub fn run(&self, store: &dyn DocumentStore, cancel: &CancelToken) -> StepResult {
        match self {
            Step::Batch(s) => s.run(store, cancel),
            Step::Corrective(s) => s.run(store),
        }
    }

    /// Result for a step that was never started because the run was cancelled.
    pub fn not_started(&self, reason: &str) -> StepResult {
        let mut tally = StepTally::begin(self.name(), self.target());
        tally.error = Some(reason.to_string());
        tally.finish()
    }
}

impl From<BatchStep> for Step {
    fn from(step: BatchStep) -> Self {
        Step::Batch(step)
    }
}

impl From<CorrectiveStep> for Step {
    fn from(step: CorrectiveStep) -> Self {
        Step::Corrective(step)
    }
}
