//! A migration version: one deployable schema change, as an ordered list of
//! steps.

use std::fmt;

use crate::catalog::CollectionRef;
use crate::observe::StepObserver;
use crate::step::{CancelToken, Step, StepResult};
use crate::store::DocumentStore;

pub struct Version {
    pub id: String,
    pub description: String,
    steps: Vec<Step>,
}

impl Version {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Every collection any step of this version reads or writes.
    pub fn touched(&self) -> Vec<&CollectionRef> {
        let mut all: Vec<&CollectionRef> = self.steps.iter().flat_map(Step::touched).collect();
        all.sort();
        all.dedup();
        all
    }

    /// Run every step in declaration order. A failing step never stops the
    /// ones after it; once `cancel` fires, the remaining steps are reported
    /// as not started.
    pub fn apply(
        &self,
        store: &dyn DocumentStore,
        observer: &dyn StepObserver,
        cancel: &CancelToken,
    ) -> Vec<StepResult> {
        self.steps
            .iter()
            .map(|step| run_observed(&self.id, step, store, observer, cancel))
            .collect()
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(Step::name).collect();
        f.debug_struct("Version")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("steps", &steps)
            .finish()
    }
}

pub(crate) fn run_observed(
    version: &str,
    step: &Step,
    store: &dyn DocumentStore,
    observer: &dyn StepObserver,
    cancel: &CancelToken,
) -> StepResult {
    if cancel.is_cancelled() {
        let result = step.not_started("cancelled before start");
        observer.step_finished(version, &result);
        return result;
    }
    observer.step_started(version, step);
    let result = step.run(store, cancel);
    observer.step_finished(version, &result);
    result
}
