//! Task lifecycle state machine.
//!
//! Pure transition table: the machine holds no business data and is queried
//! by the scheduler to gate dispatch. Applying a trigger from a state
//! outside its allowed source set fails with `InvalidTransitionError` and
//! leaves the state untouched (the scheduler only commits the returned
//! destination on `Ok`).

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Lifecycle state of one task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Queued,
    Running,
    WaitingForDependency,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::WaitingForDependency => "waiting_for_dependency",
            TaskState::Retrying => "retrying",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(TaskState::Idle),
            "queued" => Some(TaskState::Queued),
            "running" => Some(TaskState::Running),
            "waiting_for_dependency" => Some(TaskState::WaitingForDependency),
            "retrying" => Some(TaskState::Retrying),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            "cancelled" => Some(TaskState::Cancelled),
            _ => None,
        }
    }

    /// Terminal until an explicit `reset_task`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    StartTask,
    BeginExecution,
    WaitForDependency,
    ResumeExecution,
    RetryTask,
    CompleteTask,
    FailTask,
    CancelTask,
    ResetTask,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::StartTask => "start_task",
            Trigger::BeginExecution => "begin_execution",
            Trigger::WaitForDependency => "wait_for_dependency",
            Trigger::ResumeExecution => "resume_execution",
            Trigger::RetryTask => "retry_task",
            Trigger::CompleteTask => "complete_task",
            Trigger::FailTask => "fail_task",
            Trigger::CancelTask => "cancel_task",
            Trigger::ResetTask => "reset_task",
        }
    }

    /// Source states from which this trigger is legal.
    fn sources(&self) -> &'static [TaskState] {
        match self {
            Trigger::StartTask => &[TaskState::Idle],
            Trigger::BeginExecution => &[TaskState::Queued],
            Trigger::WaitForDependency => &[TaskState::Running],
            Trigger::ResumeExecution => {
                &[TaskState::WaitingForDependency, TaskState::Retrying]
            }
            Trigger::RetryTask => &[TaskState::Running],
            Trigger::CompleteTask => &[TaskState::Running],
            Trigger::FailTask => &[
                TaskState::Running,
                TaskState::WaitingForDependency,
                TaskState::Retrying,
            ],
            Trigger::CancelTask => &[
                TaskState::Queued,
                TaskState::Running,
                TaskState::WaitingForDependency,
                TaskState::Retrying,
            ],
            Trigger::ResetTask => &[
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Cancelled,
            ],
        }
    }

    fn destination(&self) -> TaskState {
        match self {
            Trigger::StartTask => TaskState::Queued,
            Trigger::BeginExecution => TaskState::Running,
            Trigger::WaitForDependency => TaskState::WaitingForDependency,
            Trigger::ResumeExecution => TaskState::Running,
            Trigger::RetryTask => TaskState::Retrying,
            Trigger::CompleteTask => TaskState::Completed,
            Trigger::FailTask => TaskState::Failed,
            Trigger::CancelTask => TaskState::Cancelled,
            Trigger::ResetTask => TaskState::Idle,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply a trigger to a state, returning the destination state.
///
/// All-or-nothing: on error the caller's state is unchanged.
pub fn apply(state: TaskState, trigger: Trigger) -> Result<TaskState, OrchestratorError> {
    if trigger.sources().contains(&state) {
        Ok(trigger.destination())
    } else {
        Err(OrchestratorError::InvalidTransition {
            trigger: trigger.as_str().to_string(),
            state: state.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = TaskState::Idle;
        for trigger in [
            Trigger::StartTask,
            Trigger::BeginExecution,
            Trigger::WaitForDependency,
            Trigger::ResumeExecution,
            Trigger::CompleteTask,
        ] {
            state = apply(state, trigger).unwrap();
        }
        assert_eq!(state, TaskState::Completed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_retry_substate_reenters_running() {
        let state = apply(TaskState::Running, Trigger::RetryTask).unwrap();
        assert_eq!(state, TaskState::Retrying);
        let state = apply(state, Trigger::ResumeExecution).unwrap();
        assert_eq!(state, TaskState::Running);
    }

    #[test]
    fn test_illegal_trigger_leaves_state_unchanged() {
        let state = TaskState::Completed;
        let err = apply(state, Trigger::BeginExecution).unwrap_err();
        match err {
            OrchestratorError::InvalidTransition { trigger, state: s } => {
                assert_eq!(trigger, "begin_execution");
                assert_eq!(s, "completed");
            }
            other => panic!("unexpected error: {other}"),
        }
        // caller still owns the original state
        assert_eq!(state, TaskState::Completed);
    }

    #[test]
    fn test_cancel_sources() {
        for src in [
            TaskState::Queued,
            TaskState::Running,
            TaskState::WaitingForDependency,
            TaskState::Retrying,
        ] {
            assert_eq!(apply(src, Trigger::CancelTask).unwrap(), TaskState::Cancelled);
        }
        assert!(apply(TaskState::Idle, Trigger::CancelTask).is_err());
        assert!(apply(TaskState::Completed, Trigger::CancelTask).is_err());
    }

    #[test]
    fn test_reset_only_from_terminal() {
        for src in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            assert_eq!(apply(src, Trigger::ResetTask).unwrap(), TaskState::Idle);
        }
        assert!(apply(TaskState::Running, Trigger::ResetTask).is_err());
        assert!(apply(TaskState::Queued, Trigger::ResetTask).is_err());
    }

    #[test]
    fn test_fail_task_sources() {
        for src in [
            TaskState::Running,
            TaskState::WaitingForDependency,
            TaskState::Retrying,
        ] {
            assert_eq!(apply(src, Trigger::FailTask).unwrap(), TaskState::Failed);
        }
        assert!(apply(TaskState::Idle, Trigger::FailTask).is_err());
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            TaskState::Idle,
            TaskState::Queued,
            TaskState::Running,
            TaskState::WaitingForDependency,
            TaskState::Retrying,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            assert_eq!(TaskState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::from_str("bogus"), None);
    }
}
