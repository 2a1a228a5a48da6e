//! Step instrumentation, kept outside the steps themselves.

use tracing::{debug, info, warn};

use crate::step::{Step, StepResult, StepStatus};

/// Hooks invoked around every step execution.
pub trait StepObserver: Send + Sync {
    fn step_started(&self, version: &str, step: &Step);
    fn step_finished(&self, version: &str, result: &StepResult);
}

/// Observer that does nothing.
pub struct Silent;

impl StepObserver for Silent {
    fn step_started(&self, _version: &str, _step: &Step) {}
    fn step_finished(&self, _version: &str, _result: &StepResult) {}
}

/// Emits one `tracing` event when a step starts and one when it ends.
pub struct TracingObserver;

impl StepObserver for TracingObserver {
    fn step_started(&self, version: &str, step: &Step) {
        debug!(
            version,
            step = step.name(),
            target = %step.target(),
            kind = step.kind(),
            "step started"
        );
    }

    fn step_finished(&self, version: &str, result: &StepResult) {
        match result.status() {
            StepStatus::Complete => info!(
                version,
                step = %result.step,
                target = %result.target,
                scanned = result.scanned,
                applied = result.succeeded,
                affected = result.affected,
                duration_ms = result.duration_ms,
                "step complete"
            ),
            StepStatus::Partial => warn!(
                version,
                step = %result.step,
                target = %result.target,
                applied = result.succeeded,
                failures = result.failures.len(),
                duration_ms = result.duration_ms,
                "step partially applied"
            ),
            StepStatus::Failed => warn!(
                version,
                step = %result.step,
                target = %result.target,
                error = result.error.as_deref().unwrap_or_default(),
                "step failed"
            ),
        }
    }
}
