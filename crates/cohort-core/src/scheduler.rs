//! Scheduler/dispatcher — turns validated workflows into concurrent step
//! dispatches.
//!
//! One driver task per submitted task owns its `TaskInstance` (single-writer
//! discipline): concurrent step executions run in a `JoinSet` and report
//! outcomes back to the driver, which serializes every aggregate-state
//! mutation, persists a snapshot after each transition, and feeds the
//! telemetry sink. A global semaphore bounds step concurrency across tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::CollaborationRules;
use crate::degradation::DegradationController;
use crate::error::OrchestratorError;
use crate::executor::{execute_bounded, AgentExecutor, ExecutorError, StepInput};
use crate::machine::{self, TaskState, Trigger};
use crate::model::{
    ErrorDescriptor, StepStatus, StepTrace, TaskInstance, TaskPriority, TaskStatus,
};
use crate::registry::{StepDefinition, WorkflowRegistry};
use crate::resolver;
use crate::store::TaskStore;
use crate::telemetry::{StepOutcome, TelemetrySink};

/// Task submission boundary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub task_id: String,
    pub workflow_name: String,
    pub user_input: String,
    #[serde(default)]
    pub priority: TaskPriority,
}

/// Aggregate task statistics, for the health monitor and callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total_tasks: i64,
    pub active_tasks: i64,
    pub by_state: HashMap<String, i64>,
    pub global_failures: u32,
    pub degradation_forced: bool,
}

/// Outcome of one step attempt, reported back to the driver.
struct StepCompletion {
    step_index: usize,
    result: Result<crate::executor::StepOutput, ExecutorError>,
    elapsed: Duration,
}

struct TaskHandle {
    instance: Arc<Mutex<TaskInstance>>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

pub struct Scheduler {
    registry: Arc<WorkflowRegistry>,
    executor: Arc<dyn AgentExecutor>,
    telemetry: Arc<dyn TelemetrySink>,
    store: TaskStore,
    degradation: DegradationController,
    rules: CollaborationRules,
    permits: Arc<Semaphore>,
    tasks: RwLock<HashMap<String, Arc<TaskHandle>>>,
    global_failures: AtomicU32,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Build a scheduler against the registry's current rules snapshot.
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        executor: Arc<dyn AgentExecutor>,
        telemetry: Arc<dyn TelemetrySink>,
        store: TaskStore,
    ) -> Arc<Self> {
        let rules = registry.snapshot().rules.clone();
        let degradation =
            DegradationController::new(executor.clone(), rules.max_error_message_len);
        Arc::new(Self {
            registry,
            executor,
            telemetry,
            store,
            degradation,
            permits: Arc::new(Semaphore::new(rules.max_concurrent_steps.max(1))),
            rules,
            tasks: RwLock::new(HashMap::new()),
            global_failures: AtomicU32::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    /// Accept a task and spawn its driver. Fails with `DuplicateTask` when
    /// the id was already submitted and `NotFound` for an unknown workflow.
    pub async fn submit(self: &Arc<Self>, request: SubmitRequest) -> Result<(), OrchestratorError> {
        if self.tasks.read().await.contains_key(&request.task_id) {
            return Err(OrchestratorError::DuplicateTask(request.task_id));
        }
        if self.store.get(&request.task_id).await?.is_some() {
            return Err(OrchestratorError::DuplicateTask(request.task_id));
        }

        // the workflow Arc captured here is the task's definition snapshot
        let workflow = self.registry.workflow(&request.workflow_name)?;

        let mut instance = TaskInstance::new(
            request.task_id.clone(),
            workflow,
            request.user_input,
            request.priority,
        );
        transition(&mut instance, Trigger::StartTask)?;
        self.store.save(&instance.snapshot()).await?;

        tracing::info!(
            task_id = %instance.id,
            workflow = %instance.workflow.name,
            "Task accepted and queued"
        );

        let handle = Arc::new(TaskHandle {
            instance: Arc::new(Mutex::new(instance)),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        });

        let scheduler = self.clone();
        let driver_handle = handle.clone();
        let join = tokio::spawn(async move {
            scheduler.drive(driver_handle).await;
        });
        *handle.driver.lock().await = Some(join);

        self.tasks
            .write()
            .await
            .insert(request.task_id, handle);
        Ok(())
    }

    /// Request cancellation: in-flight step results are discarded and no
    /// further steps of this task dispatch.
    pub async fn cancel(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let tasks = self.tasks.read().await;
        let handle = tasks
            .get(task_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("task '{}'", task_id)))?;
        handle.cancel.cancel();
        Ok(())
    }

    /// Status query boundary.
    pub async fn status(&self, task_id: &str) -> Result<TaskStatus, OrchestratorError> {
        if let Some(handle) = self.tasks.read().await.get(task_id) {
            return Ok(handle.instance.lock().await.status());
        }
        match self.store.get(task_id).await? {
            Some(snapshot) => Ok(snapshot.status()),
            None => Err(OrchestratorError::NotFound(format!("task '{}'", task_id))),
        }
    }

    /// Await a task's driver and return the final status.
    pub async fn wait(&self, task_id: &str) -> Result<TaskStatus, OrchestratorError> {
        let join = {
            let tasks = self.tasks.read().await;
            let handle = tasks
                .get(task_id)
                .ok_or_else(|| OrchestratorError::NotFound(format!("task '{}'", task_id)))?;
            let join = handle.driver.lock().await.take();
            join
        };
        if let Some(join) = join {
            join.await
                .map_err(|e| OrchestratorError::Internal(format!("driver panicked: {}", e)))?;
        }
        self.status(task_id).await
    }

    /// Aggregate statistics over persisted tasks.
    pub async fn stats(&self) -> Result<TaskStatistics, OrchestratorError> {
        let by_state = self.store.count_by_state().await?;
        let total: i64 = by_state.values().sum();
        let active: i64 = by_state
            .iter()
            .filter(|(state, _)| {
                !matches!(state.as_str(), "completed" | "failed" | "cancelled")
            })
            .map(|(_, n)| n)
            .sum();
        let failures = self.global_failures.load(Ordering::Relaxed);
        Ok(TaskStatistics {
            total_tasks: total,
            active_tasks: active,
            by_state,
            global_failures: failures,
            degradation_forced: failures >= self.rules.escalation_threshold,
        })
    }

    /// Spawn the retention sweeper: deletes terminal tasks older than the
    /// configured age on a fixed interval, until shutdown.
    pub fn spawn_retention_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        let max_age = chrono::Duration::hours(self.rules.retention_max_age_hours);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let cutoff = Utc::now() - max_age;
                        match scheduler.store.delete_completed_before(cutoff).await {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(deleted = n, "Retention sweep removed old tasks"),
                            Err(e) => tracing::error!("Retention sweep failed: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Spawn the health monitor: logs task statistics and the degradation
    /// signal on the configured interval, until shutdown.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        let every = Duration::from_secs(self.rules.health_check_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match scheduler.stats().await {
                            Ok(stats) => tracing::info!(
                                total = stats.total_tasks,
                                active = stats.active_tasks,
                                global_failures = stats.global_failures,
                                status = if stats.degradation_forced { "degraded" } else { "healthy" },
                                "health check"
                            ),
                            Err(e) => tracing::error!("health check failed: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Stop upkeep tasks. Running task drivers finish on their own.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ─── Driver ───────────────────────────────────────────────────────────

    async fn drive(self: Arc<Self>, handle: Arc<TaskHandle>) {
        let started = Instant::now();

        {
            let mut instance = handle.instance.lock().await;
            if let Err(e) = transition(&mut instance, Trigger::BeginExecution) {
                tracing::error!(task_id = %instance.id, "cannot begin execution: {}", e);
                return;
            }
            instance.started_at = Some(Utc::now());
        }
        self.persist(&handle).await;

        if self.degradation_forced() {
            let forced = ExecutorError::Collaboration(
                "escalation threshold reached, degrading without collaborative run".to_string(),
            );
            self.degrade(&handle, &forced).await;
        } else {
            self.run_pipeline(&handle).await;
        }

        let (task_id, state, degraded) = {
            let instance = handle.instance.lock().await;
            (instance.id.clone(), instance.state, instance.degraded())
        };
        self.telemetry
            .record_task(&task_id, started.elapsed(), state, degraded);
    }

    /// Execute the workflow's steps until the task reaches a terminal state.
    async fn run_pipeline(&self, handle: &Arc<TaskHandle>) {
        let order = {
            let instance = handle.instance.lock().await;
            match resolver::execution_order(&instance.workflow) {
                Ok(order) => order,
                Err(e) => {
                    drop(instance);
                    self.fail(handle, "ConfigError", &e.to_string()).await;
                    return;
                }
            }
        };

        let mut inflight: JoinSet<StepCompletion> = JoinSet::new();

        loop {
            if handle.cancel.is_cancelled() {
                inflight.abort_all();
                self.finish_cancelled(handle).await;
                return;
            }

            // dispatch every ready step, in resolver order (priority ties
            // already broken deterministically)
            let mut dispatched = 0usize;
            {
                let mut instance = handle.instance.lock().await;
                if instance.state == TaskState::Retrying {
                    let _ = transition(&mut instance, Trigger::ResumeExecution);
                }
                for &idx in &order {
                    let step = &instance.workflow.steps[idx];
                    if instance.steps[&step.name].status != StepStatus::Pending {
                        continue;
                    }
                    let deps_met = step.dependencies.iter().all(|dep| {
                        matches!(
                            instance.steps[dep].status,
                            StepStatus::Succeeded | StepStatus::Skipped
                        )
                    });
                    if !deps_met {
                        continue;
                    }
                    let step = step.clone();
                    self.dispatch_attempt(&mut instance, &step, idx, None, &mut inflight);
                    dispatched += 1;
                }
            }
            if dispatched > 0 {
                self.persist(handle).await;
            }

            // completion check
            let all_terminal = {
                let instance = handle.instance.lock().await;
                instance.steps.values().all(|r| r.status.is_terminal())
            };
            if all_terminal && inflight.is_empty() {
                self.finish_completed(handle).await;
                return;
            }
            if inflight.is_empty() {
                // pending steps with no dispatchable work: required
                // dependency failed without ending the task — a bug guard
                self.fail(
                    handle,
                    "InternalError",
                    "pipeline stalled with no runnable steps",
                )
                .await;
                return;
            }

            // nothing new dispatched: this task is waiting on its own steps
            if dispatched == 0 {
                let mut instance = handle.instance.lock().await;
                if instance.state == TaskState::Running {
                    let _ = transition(&mut instance, Trigger::WaitForDependency);
                }
            }

            let completion = tokio::select! {
                _ = handle.cancel.cancelled() => {
                    inflight.abort_all();
                    self.finish_cancelled(handle).await;
                    return;
                }
                joined = inflight.join_next() => match joined {
                    Some(Ok(completion)) => completion,
                    Some(Err(e)) => {
                        if e.is_cancelled() {
                            continue;
                        }
                        self.fail(handle, "InternalError", &format!("step task panicked: {}", e))
                            .await;
                        return;
                    }
                    None => continue,
                },
            };

            {
                let mut instance = handle.instance.lock().await;
                if instance.state == TaskState::WaitingForDependency {
                    let _ = transition(&mut instance, Trigger::ResumeExecution);
                }
            }

            if self
                .handle_completion(handle, completion, &mut inflight)
                .await
            {
                return;
            }
        }
    }

    /// Apply one step outcome. Returns true when the task reached a
    /// terminal state and the driver should stop.
    async fn handle_completion(
        &self,
        handle: &Arc<TaskHandle>,
        completion: StepCompletion,
        inflight: &mut JoinSet<StepCompletion>,
    ) -> bool {
        let StepCompletion {
            step_index,
            result,
            elapsed,
        } = completion;

        match result {
            Ok(output) => {
                let mut instance = handle.instance.lock().await;
                let step = instance.workflow.steps[step_index].clone();
                let record = instance
                    .steps
                    .get_mut(&step.name)
                    .expect("step record exists");
                record.status = StepStatus::Succeeded;
                record.finished_at = Some(Utc::now());
                instance
                    .context
                    .record(&step.name, &step.agent.name, output.content.clone());
                instance.trace.push(StepTrace {
                    step: step.name.clone(),
                    agent: step.agent.name.clone(),
                    output: output.content,
                    duration_ms: elapsed.as_millis() as u64,
                });
                drop(instance);
                self.telemetry
                    .record_step(&step.agent.name, elapsed, StepOutcome::Succeeded);
                self.persist(handle).await;
                false
            }
            Err(err) => {
                self.handle_failure(handle, step_index, err, elapsed, inflight)
                    .await
            }
        }
    }

    async fn handle_failure(
        &self,
        handle: &Arc<TaskHandle>,
        step_index: usize,
        err: ExecutorError,
        elapsed: Duration,
        inflight: &mut JoinSet<StepCompletion>,
    ) -> bool {
        let timed_out = matches!(err, ExecutorError::Timeout(_));

        // retry path
        let retry_scheduled = {
            let mut instance = handle.instance.lock().await;
            let step = instance.workflow.steps[step_index].clone();
            let record = instance
                .steps
                .get_mut(&step.name)
                .expect("step record exists");
            record.last_error = Some(err.to_string());

            if step.retry_on_failure && record.attempts < step.agent.max_retries {
                let attempts = record.attempts;
                let delay = self.rules.retry.delay_for_attempt(attempts.saturating_sub(1));
                tracing::warn!(
                    task_id = %instance.id,
                    step = %step.name,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "step failed ({}), retrying with backoff",
                    err.kind()
                );
                self.dispatch_attempt(&mut instance, &step, step_index, Some(delay), inflight);
                // the backoff is the only outstanding work: surface the
                // retrying sub-state
                if inflight.len() == 1 && instance.state == TaskState::Running {
                    let _ = transition(&mut instance, Trigger::RetryTask);
                }
                true
            } else {
                false
            }
        };

        let outcome = if timed_out {
            StepOutcome::TimedOut
        } else if retry_scheduled {
            StepOutcome::Retried
        } else {
            StepOutcome::Failed
        };
        {
            let instance = handle.instance.lock().await;
            let agent_name = instance.workflow.steps[step_index].agent.name.clone();
            drop(instance);
            self.telemetry.record_step(&agent_name, elapsed, outcome);
        }

        if retry_scheduled {
            self.persist(handle).await;
            return false;
        }

        // retries exhausted
        let (step, required): (StepDefinition, bool) = {
            let instance = handle.instance.lock().await;
            let step = instance.workflow.steps[step_index].clone();
            let required = step.required;
            (step, required)
        };

        if !required {
            let mut instance = handle.instance.lock().await;
            let record = instance
                .steps
                .get_mut(&step.name)
                .expect("step record exists");
            record.status = StepStatus::Skipped;
            record.finished_at = Some(Utc::now());
            if self.rules.skipped_step_placeholder {
                instance.context.record_placeholder(&step.name, &step.agent.name);
            }
            tracing::warn!(
                task_id = %instance.id,
                step = %step.name,
                "optional step exhausted retries ({}), skipped",
                err.kind()
            );
            drop(instance);
            self.persist(handle).await;
            return false;
        }

        // required step exhausted: this counts as a global failure
        self.global_failures.fetch_add(1, Ordering::Relaxed);
        {
            let mut instance = handle.instance.lock().await;
            let record = instance
                .steps
                .get_mut(&step.name)
                .expect("step record exists");
            record.status = StepStatus::Failed;
            record.finished_at = Some(Utc::now());
        }

        // in-flight siblings are abandoned either way
        inflight.abort_all();

        if err.triggers_degradation() {
            self.degrade(handle, &err).await;
        } else {
            self.fail(handle, err.kind(), &err.to_string()).await;
        }
        true
    }

    /// Spawn one step attempt into the join set. The attempt waits for a
    /// worker-pool permit (and an optional backoff delay) before executing.
    fn dispatch_attempt(
        &self,
        instance: &mut TaskInstance,
        step: &StepDefinition,
        step_index: usize,
        delay: Option<Duration>,
        inflight: &mut JoinSet<StepCompletion>,
    ) {
        let record = instance
            .steps
            .get_mut(&step.name)
            .expect("step record exists");
        record.status = StepStatus::Running;
        record.attempts += 1;
        if record.started_at.is_none() {
            record.started_at = Some(Utc::now());
        }

        let prompt = match &step.input {
            Some(template) => instance
                .context
                .resolve_template(template, &instance.user_input),
            None if instance.context.is_empty() => {
                format!("## Request\n{}", instance.user_input)
            }
            None => format!(
                "## Request\n{}\n\n## Context from completed steps\n{}",
                instance.user_input,
                instance.context.digest()
            ),
        };
        let input = StepInput {
            task_id: instance.id.clone(),
            step_name: step.name.clone(),
            prompt,
        };

        let agent = step.agent.clone();
        let executor = self.executor.clone();
        let permits = self.permits.clone();
        inflight.spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return StepCompletion {
                        step_index,
                        result: Err(ExecutorError::Collaboration(
                            "worker pool closed".to_string(),
                        )),
                        elapsed: Duration::ZERO,
                    }
                }
            };
            let started = Instant::now();
            let result = execute_bounded(executor.as_ref(), &agent, &input).await;
            StepCompletion {
                step_index,
                result,
                elapsed: started.elapsed(),
            }
        });
    }

    // ─── Terminal transitions ─────────────────────────────────────────────

    fn degradation_forced(&self) -> bool {
        self.global_failures.load(Ordering::Relaxed) >= self.rules.escalation_threshold
    }

    /// Run the degradation controller and finalize the task either way.
    async fn degrade(&self, handle: &Arc<TaskHandle>, original: &ExecutorError) {
        let view = handle.instance.lock().await.clone();
        match self.degradation.synthesize(&view, original).await {
            Ok(result) => {
                let mut instance = handle.instance.lock().await;
                // steps the simulation replaced no longer run
                for record in instance.steps.values_mut() {
                    if !record.status.is_terminal() {
                        record.status = StepStatus::Skipped;
                    }
                }
                instance.result = Some(result);
                ensure_running(&mut instance);
                let _ = transition(&mut instance, Trigger::CompleteTask);
                instance.completed_at = Some(Utc::now());
                drop(instance);
                self.persist(handle).await;
            }
            Err(e) => {
                let (kind, message) = match &e {
                    OrchestratorError::Degradation { original, degraded } => (
                        "DegradationFailure",
                        format!("original: {}; degraded: {}", original, degraded),
                    ),
                    other => ("DegradationFailure", other.to_string()),
                };
                self.fail(handle, kind, &message).await;
            }
        }
    }

    async fn finish_completed(&self, handle: &Arc<TaskHandle>) {
        let mut instance = handle.instance.lock().await;
        let final_text = instance
            .context
            .last_output()
            .unwrap_or_default()
            .to_string();
        let trace = instance.trace.clone();
        instance.result = Some(crate::model::TaskResult {
            final_text,
            trace,
            degraded: false,
            error: None,
        });
        ensure_running(&mut instance);
        let _ = transition(&mut instance, Trigger::CompleteTask);
        instance.completed_at = Some(Utc::now());
        tracing::info!(task_id = %instance.id, "task completed");
        drop(instance);
        self.persist(handle).await;
    }

    async fn finish_cancelled(&self, handle: &Arc<TaskHandle>) {
        let mut instance = handle.instance.lock().await;
        if instance.state.is_terminal() {
            return;
        }
        let _ = transition(&mut instance, Trigger::CancelTask);
        instance.completed_at = Some(Utc::now());
        tracing::info!(task_id = %instance.id, "task cancelled, in-flight results discarded");
        drop(instance);
        self.persist(handle).await;
    }

    async fn fail(&self, handle: &Arc<TaskHandle>, kind: &str, message: &str) {
        let mut instance = handle.instance.lock().await;
        instance.error = Some(ErrorDescriptor::new(
            kind,
            message,
            self.rules.max_error_message_len,
        ));
        if !instance.state.is_terminal() {
            let _ = transition(&mut instance, Trigger::FailTask);
        }
        instance.completed_at = Some(Utc::now());
        tracing::error!(task_id = %instance.id, kind, "task failed: {}", message);
        drop(instance);
        self.persist(handle).await;
    }

    async fn persist(&self, handle: &Arc<TaskHandle>) {
        let snapshot = handle.instance.lock().await.snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::error!(task_id = %snapshot.id, "failed to persist task snapshot: {}", e);
        }
    }
}

/// Apply a state-machine trigger to the instance, all-or-nothing.
fn transition(instance: &mut TaskInstance, trigger: Trigger) -> Result<(), OrchestratorError> {
    match machine::apply(instance.state, trigger) {
        Ok(next) => {
            instance.state = next;
            Ok(())
        }
        Err(e) => {
            tracing::error!(task_id = %instance.id, "{}", e);
            Err(e)
        }
    }
}

/// Bring a waiting/retrying task back to running before a terminal
/// transition that requires it.
fn ensure_running(instance: &mut TaskInstance) {
    if matches!(
        instance.state,
        TaskState::WaitingForDependency | TaskState::Retrying
    ) {
        let _ = transition(instance, Trigger::ResumeExecution);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_defaults_priority() {
        let req: SubmitRequest = serde_json::from_str(
            r#"{"task_id":"t","workflow_name":"default","user_input":"hi"}"#,
        )
        .unwrap();
        assert_eq!(req.priority, TaskPriority::Normal);
    }
}
