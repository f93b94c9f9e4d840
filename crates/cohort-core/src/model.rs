//! Task instance data model.
//!
//! A `TaskInstance` is created when a caller submits a workflow execution
//! request, mutated exclusively by the scheduler's per-task driver, and
//! archived to the task store after every transition. The workflow
//! definition Arc is the snapshot captured at creation time; registry
//! reloads never touch it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::machine::TaskState;
use crate::registry::WorkflowDefinition;

/// Submission priority, carried through to telemetry and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "normal" => Some(TaskPriority::Normal),
            "high" => Some(TaskPriority::High),
            "urgent" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }
}

/// Per-step status within one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Mutable per-step bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    /// Executions performed so far; never exceeds the agent's max_retries
    pub attempts: u32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            attempts: 0,
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Serializable error descriptor: stable kind string plus a length-capped
/// human-readable message. Never carries a raw internal payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    #[serde(rename = "errorType")]
    pub kind: String,
    #[serde(rename = "errorMessage")]
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(kind: &str, message: &str, cap: usize) -> Self {
        Self {
            kind: kind.to_string(),
            message: truncate(message, cap),
        }
    }
}

/// Truncate on a char boundary, marking elision.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// One entry of the step-by-step result trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub step: String,
    pub agent: String,
    pub output: String,
    pub duration_ms: u64,
}

/// Terminal task result. The degraded path produces the same shape with
/// `degraded: true` and the original failure recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub final_text: String,
    pub trace: Vec<StepTrace>,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

/// One live task, owned by its scheduler driver.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub id: String,
    pub workflow: Arc<WorkflowDefinition>,
    pub user_input: String,
    pub priority: TaskPriority,
    pub state: TaskState,
    pub steps: BTreeMap<String, StepRecord>,
    pub context: ExecutionContext,
    pub trace: Vec<StepTrace>,
    pub result: Option<TaskResult>,
    pub error: Option<ErrorDescriptor>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskInstance {
    pub fn new(
        id: String,
        workflow: Arc<WorkflowDefinition>,
        user_input: String,
        priority: TaskPriority,
    ) -> Self {
        let steps = workflow
            .steps
            .iter()
            .map(|s| (s.name.clone(), StepRecord::pending()))
            .collect();
        Self {
            id,
            workflow,
            user_input,
            priority,
            state: TaskState::Idle,
            steps,
            context: ExecutionContext::new(),
            trace: Vec::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn step_record(&self, name: &str) -> Option<&StepRecord> {
        self.steps.get(name)
    }

    pub fn degraded(&self) -> bool {
        self.result.as_ref().map(|r| r.degraded).unwrap_or(false)
    }

    /// Status view exposed at the query boundary.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.id.clone(),
            workflow_name: self.workflow.name.clone(),
            state: self.state,
            per_step_status: self
                .steps
                .iter()
                .map(|(name, rec)| (name.clone(), rec.status))
                .collect(),
            degraded: self.degraded(),
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    /// Serializable snapshot for the task store.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            workflow_name: self.workflow.name.clone(),
            state: self.state,
            priority: self.priority,
            steps: self.steps.clone(),
            context: self.context.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            degraded: self.degraded(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Status query boundary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub workflow_name: String,
    pub state: TaskState,
    pub per_step_status: BTreeMap<String, StepStatus>,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

/// Persisted task snapshot (store row payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub workflow_name: String,
    pub state: TaskState,
    pub priority: TaskPriority,
    pub steps: BTreeMap<String, StepRecord>,
    pub context: ExecutionContext,
    pub result: Option<TaskResult>,
    pub error: Option<ErrorDescriptor>,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Status view rebuilt from an archived snapshot.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.id.clone(),
            workflow_name: self.workflow_name.clone(),
            state: self.state,
            per_step_status: self
                .steps
                .iter()
                .map(|(name, rec)| (name.clone(), rec.status))
                .collect(),
            degraded: self.degraded,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}
