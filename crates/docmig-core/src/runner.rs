//! Runs migration versions in declared order and aggregates their results.
//!
//! Versions are strictly sequential: every step of one version has finished
//! before the next version starts. Within a version, steps run one after the
//! other by default. With more than one worker, steps are grouped into lanes
//! (steps that share any collection land in the same lane and keep their
//! declared order) and lanes are spread over a bounded set of scoped threads.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::CollectionRef;
use crate::observe::{StepObserver, TracingObserver};
use crate::step::{CancelToken, Step, StepResult, StepStatus};
use crate::store::DocumentStore;
use crate::version::{run_observed, Version};

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionReport {
    pub id: String,
    pub description: String,
    pub results: Vec<StepResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub versions: Vec<VersionReport>,
}

impl RunReport {
    /// True when every step of every version completed without failures.
    pub fn is_clean(&self) -> bool {
        self.results().all(|(_, r)| r.status() == StepStatus::Complete)
    }

    pub fn results(&self) -> impl Iterator<Item = (&str, &StepResult)> {
        self.versions
            .iter()
            .flat_map(|v| v.results.iter().map(move |r| (v.id.as_str(), r)))
    }

    /// Steps that were partially applied or failed outright.
    pub fn failed_steps(&self) -> impl Iterator<Item = (&str, &StepResult)> {
        self.results()
            .filter(|(_, r)| r.status() != StepStatus::Complete)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct Runner<'s> {
    store: &'s dyn DocumentStore,
    observer: Box<dyn StepObserver>,
    workers: usize,
    cancel: CancelToken,
}

impl<'s> Runner<'s> {
    pub fn new(store: &'s dyn DocumentStore) -> Self {
        Self {
            store,
            observer: Box::new(TracingObserver),
            workers: 1,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl StepObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Token that stops the run between documents and between steps.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(&self, versions: &[Version]) -> RunReport {
        let mut report = RunReport::default();
        for version in versions {
            info!(
                version = %version.id,
                steps = version.steps().len(),
                workers = self.workers,
                "applying version"
            );
            let results = if self.workers == 1 {
                version.apply(self.store, self.observer.as_ref(), &self.cancel)
            } else {
                self.apply_in_lanes(version)
            };
            report.versions.push(VersionReport {
                id: version.id.clone(),
                description: version.description.clone(),
                results,
            });
        }
        report
    }

    fn apply_in_lanes(&self, version: &Version) -> Vec<StepResult> {
        let steps = version.steps();
        let lanes = lanes(steps);
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<StepResult>>> = Mutex::new(vec![None; steps.len()]);

        std::thread::scope(|scope| {
            for _ in 0..self.workers.min(lanes.len()) {
                scope.spawn(|| loop {
                    let Some(lane) = lanes.get(next.fetch_add(1, Ordering::SeqCst)) else {
                        break;
                    };
                    for &index in lane {
                        let result = run_observed(
                            &version.id,
                            &steps[index],
                            self.store,
                            self.observer.as_ref(),
                            &self.cancel,
                        );
                        slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(result);
                    }
                });
            }
        });

        slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Partition step indices so that steps touching a common collection share a
/// lane. Lanes keep declaration order internally and are ordered by their
/// first step.
pub(crate) fn lanes(steps: &[Step]) -> Vec<Vec<usize>> {
    let mut lanes: Vec<(Vec<usize>, BTreeSet<&CollectionRef>)> = Vec::new();
    for (index, step) in steps.iter().enumerate() {
        let mut collections: BTreeSet<&CollectionRef> = step.touched().into_iter().collect();
        let mut members = vec![index];
        let (overlapping, disjoint): (Vec<_>, Vec<_>) = lanes
            .into_iter()
            .partition(|(_, lane)| !lane.is_disjoint(&collections));
        for (lane_members, lane_collections) in overlapping {
            members.extend(lane_members);
            collections.extend(lane_collections);
        }
        members.sort_unstable();
        lanes = disjoint;
        lanes.push((members, collections));
    }
    let mut lanes: Vec<Vec<usize>> = lanes.into_iter().map(|(members, _)| members).collect();
    lanes.sort_by_key(|members| members[0]);
    lanes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::document::{Document, DocumentId, Filter};
    use crate::error::StoreError;
    use crate::observe::Silent;
    use crate::step::{BatchStep, CorrectiveStep, Selector, Transform};
    use crate::store::MemoryStore;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn normalize(ns: &str, coll: &str) -> BatchStep {
        BatchStep::new(
            format!("{ns}.{coll}"),
            Catalog::builtin().resolve(ns, coll).unwrap(),
            Transform::normalize_tags(),
        )
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for (ns, coll) in [("IDENTITY", "user"), ("SECRET", "secret"), ("CONFIG", "user_config")] {
            for i in 0..3 {
                store
                    .insert(ns, coll, doc(json!({"_id": format!("{coll}-{i}"), "tags": [{"key": "k", "value": i}]})))
                    .unwrap();
            }
        }
        store
    }

    fn three_collections() -> Version {
        Version::new("v1", "normalize")
            .step(normalize("IDENTITY", "user"))
            .step(normalize("SECRET", "secret"))
            .step(normalize("CONFIG", "user_config"))
    }

    #[test]
    fn versions_run_in_declared_order() {
        let store = MemoryStore::new();
        store.insert("IDENTITY", "user", doc(json!({"_id": "u", "tags": [{"key": "a"}]}))).unwrap();
        // v2 only deletes users whose tags are already canonical, so it sees
        // v1's output only if v1 finished first.
        let v1 = Version::new("v1", "normalize").step(normalize("IDENTITY", "user"));
        let v2 = Version::new("v2", "cleanup").step(CorrectiveStep::delete_many(
            "drop_normalized",
            Catalog::builtin().resolve("IDENTITY", "user").unwrap(),
            Filter::from_json(json!({"tags": {"a": ""}})).unwrap(),
        ));

        let report = Runner::new(&store).with_observer(Silent).run(&[v1, v2]);

        let ids: Vec<&str> = report.versions.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2"]);
        assert_eq!(report.versions[1].results[0].affected, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn failures_are_reported_and_the_run_fails_forward() {
        let store = seeded();
        store.set_unavailable("SECRET", "secret", StoreError::Timeout(1000));

        let report = Runner::new(&store).with_observer(Silent).run(&[three_collections()]);

        assert!(!report.is_clean());
        let unfinished: Vec<&str> = report.failed_steps().map(|(_, r)| r.step.as_str()).collect();
        assert_eq!(unfinished, vec!["SECRET.secret"]);
        let user = store.get("IDENTITY", "user", &DocumentId::new("user-1")).unwrap();
        assert_eq!(user["tags"], json!({"k": 1}));
    }

    #[test]
    fn parallel_run_matches_sequential_results() {
        let store = seeded();
        let report = Runner::new(&store)
            .with_observer(Silent)
            .with_workers(3)
            .run(&[three_collections()]);

        let steps: Vec<&str> = report.versions[0].results.iter().map(|r| r.step.as_str()).collect();
        assert_eq!(steps, vec!["IDENTITY.user", "SECRET.secret", "CONFIG.user_config"]);
        assert!(report.is_clean());
        assert!(report.results().all(|(_, r)| r.succeeded == 3));

        let again = Runner::new(&store).with_observer(Silent).with_workers(3).run(&[three_collections()]);
        assert!(again.results().all(|(_, r)| r.attempted == 0));
    }

    #[test]
    fn steps_sharing_a_collection_share_a_lane() {
        let catalog = Catalog::builtin();
        let cloud_service = catalog.resolve("INVENTORY", "cloud_service").unwrap();
        let steps: Vec<Step> = vec![
            BatchStep::new("tags", cloud_service.clone(), Transform::managed_tags()).into(),
            normalize("IDENTITY", "user").into(),
            CorrectiveStep::delete_many("vm", cloud_service.clone(), Filter::all()).into(),
            BatchStep::new("records", catalog.resolve("INVENTORY", "record").unwrap(), Transform::Delete)
                .with_selector(Selector::ParentKeys {
                    parent: cloud_service,
                    parent_filters: vec![Filter::all()],
                    parent_field: "cloud_service_id".into(),
                    child_field: "cloud_service_id".into(),
                })
                .into(),
            normalize("SECRET", "secret").into(),
        ];
        assert_eq!(lanes(&steps), vec![vec![0, 2, 3], vec![1], vec![4]]);
    }

    #[test]
    fn cancellation_marks_remaining_steps() {
        let store = seeded();
        let runner = Runner::new(&store).with_observer(Silent);
        runner.cancel_token().cancel();
        let report = runner.run(&[three_collections()]);
        assert!(report
            .results()
            .all(|(_, r)| r.error.as_deref() == Some("cancelled before start")));
        assert!(store.bulk_calls().is_empty());
    }
}
