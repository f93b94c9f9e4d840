//! Core error type for the Cohort orchestration domain.
//!
//! `OrchestratorError` is used throughout the core (registry, scheduler,
//! store). Step-level executor failures have their own classification enum
//! (`ExecutorError` in the executor module) because they are absorbed by the
//! retry/degradation logic instead of surfacing directly.

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Invalid transition: trigger '{trigger}' not allowed from state '{state}'")]
    InvalidTransition { trigger: String, state: String },

    #[error("Degradation failed — original: {original}; degraded: {degraded}")]
    Degradation { original: String, degraded: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Stable error kind string exposed to callers.
    ///
    /// Never includes internal payloads; pair with the length-capped
    /// display message when serializing for the status boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Config(_) => "ConfigError",
            OrchestratorError::NotFound(_) => "NotFoundError",
            OrchestratorError::DuplicateTask(_) => "DuplicateTaskId",
            OrchestratorError::InvalidTransition { .. } => "InvalidTransitionError",
            OrchestratorError::Degradation { .. } => "DegradationFailure",
            OrchestratorError::Database(_) => "DatabaseError",
            OrchestratorError::Internal(_) => "InternalError",
        }
    }
}
