//! Telemetry sink — side-effect only, never consulted for control
//! decisions.
//!
//! The production sink forwards to `tracing`; a metrics backend can plug in
//! by implementing the trait. Tests use a recording sink.

use std::time::Duration;

use crate::machine::TaskState;

/// Outcome of one step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed,
    Retried,
    TimedOut,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Succeeded => "success",
            StepOutcome::Failed => "failure",
            StepOutcome::Retried => "retry",
            StepOutcome::TimedOut => "timeout",
        }
    }
}

/// Receives step and task outcome records.
pub trait TelemetrySink: Send + Sync {
    fn record_step(&self, agent: &str, duration: Duration, outcome: StepOutcome);
    fn record_task(&self, task_id: &str, duration: Duration, final_state: TaskState, degraded: bool);
}

/// Default sink: structured log lines via `tracing`.
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record_step(&self, agent: &str, duration: Duration, outcome: StepOutcome) {
        tracing::info!(
            agent = agent,
            duration_ms = duration.as_millis() as u64,
            outcome = outcome.as_str(),
            "step outcome"
        );
    }

    fn record_task(
        &self,
        task_id: &str,
        duration: Duration,
        final_state: TaskState,
        degraded: bool,
    ) {
        tracing::info!(
            task_id = task_id,
            duration_ms = duration.as_millis() as u64,
            final_state = final_state.as_str(),
            degraded = degraded,
            "task outcome"
        );
    }
}
