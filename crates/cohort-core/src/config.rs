//! YAML schema types for agent and workflow declarations.
//!
//! A declaration document defines the agents, the workflows binding steps
//! to agents, and the global collaboration rules:
//!
//! ```yaml
//! version: "1.0"
//!
//! agents:
//!   - name: fetcher
//!     role: "Data Retrieval Specialist"
//!     capabilities: [web_scraping, search, data_retrieval]
//!     max_retries: 3
//!     timeout_seconds: 30
//!     priority: 1
//!
//! workflows:
//!   - name: default
//!     steps:
//!       - name: fetch
//!         agent: fetcher
//!       - name: summarize
//!         agent: summarizer
//!         dependencies: [fetch]
//!
//! collaboration_rules:
//!   max_concurrent_steps: 4
//!   escalation_threshold: 2
//! ```
//!
//! These are the *raw* parsed types. `WorkflowRegistry::load` validates a
//! document and resolves agent references into typed definitions.

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Top-level declaration document loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Schema version string
    #[serde(default = "default_version")]
    pub version: String,

    /// Agent capability profiles
    pub agents: Vec<AgentSpec>,

    /// Workflow definitions
    pub workflows: Vec<WorkflowSpec>,

    /// Global collaboration rules
    #[serde(default)]
    pub collaboration_rules: CollaborationRules,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Declared agent profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Agent name (unique key, referenced by workflow steps)
    pub name: String,

    /// Role label (e.g. "Data Retrieval Specialist")
    pub role: String,

    /// Ordered capability tags
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Maximum attempts for a step bound to this agent
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Priority rank — lower numbers dispatch first
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_priority() -> u8 {
    1
}

/// Declared workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Workflow name (unique key)
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Ordered list of steps
    pub steps: Vec<StepSpec>,
}

/// One step within a workflow declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step name (unique within the workflow)
    pub name: String,

    /// Referenced agent name
    pub agent: String,

    /// Whether a terminal failure of this step fails the whole task
    #[serde(default = "default_required")]
    pub required: bool,

    /// Names of steps that must finish before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Whether a failed attempt is retried (up to the agent's max_retries)
    #[serde(default = "default_retry_on_failure")]
    pub retry_on_failure: bool,

    /// Optional input template. Supports `${task.input}` and
    /// `${steps.<name>.output}` references; when absent the step receives
    /// the task input plus the accumulated context digest.
    #[serde(default)]
    pub input: Option<String>,
}

fn default_required() -> bool {
    true
}

fn default_retry_on_failure() -> bool {
    true
}

/// Global collaboration rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationRules {
    /// Concurrency ceiling for step dispatch across all tasks
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,

    /// Retry backoff policy
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Number of global required-step failures before subsequent tasks are
    /// forced down the degraded path
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,

    /// Health monitor interval in seconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// When true, a skipped optional step contributes a placeholder entry
    /// to the execution context
    #[serde(default)]
    pub skipped_step_placeholder: bool,

    /// Terminal tasks older than this are removed by the retention sweeper
    #[serde(default = "default_retention_max_age_hours")]
    pub retention_max_age_hours: i64,

    /// Upper bound for user-visible error message length
    #[serde(default = "default_max_error_message_len")]
    pub max_error_message_len: usize,
}

impl Default for CollaborationRules {
    fn default() -> Self {
        Self {
            max_concurrent_steps: default_max_concurrent_steps(),
            retry: RetryPolicy::default(),
            escalation_threshold: default_escalation_threshold(),
            health_check_interval_secs: default_health_check_interval(),
            skipped_step_placeholder: false,
            retention_max_age_hours: default_retention_max_age_hours(),
            max_error_message_len: default_max_error_message_len(),
        }
    }
}

fn default_max_concurrent_steps() -> usize {
    4
}

fn default_escalation_threshold() -> u32 {
    2
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_retention_max_age_hours() -> i64 {
    24
}

fn default_max_error_message_len() -> usize {
    512
}

/// Exponential backoff policy: `base_delay_ms * 2^attempt`, capped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetryPolicy {
    /// Backoff delay before re-dispatching after the given attempt count.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.min(16);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        std::time::Duration::from_millis(ms)
    }
}

impl ConfigDocument {
    /// Parse a declaration document from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, OrchestratorError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| OrchestratorError::Config(format!("Failed to parse declaration YAML: {}", e)))
    }

    /// Load a declaration document from a file path.
    pub fn from_file(path: &str) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("Failed to read declaration file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_document() {
        let yaml = r#"
agents:
  - name: responder
    role: "Communication Expert"
workflows:
  - name: default
    steps:
      - name: respond
        agent: responder
"#;
        let doc = ConfigDocument::from_yaml(yaml).unwrap();
        assert_eq!(doc.version, "1.0");
        assert_eq!(doc.agents.len(), 1);
        assert_eq!(doc.agents[0].max_retries, 3);
        assert_eq!(doc.agents[0].timeout_seconds, 30);
        assert_eq!(doc.agents[0].priority, 1);
        assert!(doc.workflows[0].steps[0].required);
        assert!(doc.workflows[0].steps[0].retry_on_failure);
        assert!(doc.workflows[0].steps[0].dependencies.is_empty());
        assert_eq!(doc.collaboration_rules.max_concurrent_steps, 4);
        assert_eq!(doc.collaboration_rules.escalation_threshold, 2);
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
version: "2.0"
agents:
  - name: fetcher
    role: "Data Retrieval Specialist"
    capabilities: [web_scraping, search]
    max_retries: 5
    timeout_seconds: 60
    priority: 1
  - name: summarizer
    role: "Content Expert"
    priority: 2
workflows:
  - name: default
    description: "Fetch then summarize"
    steps:
      - name: fetch
        agent: fetcher
      - name: summarize
        agent: summarizer
        required: false
        dependencies: [fetch]
        retry_on_failure: false
        input: "Summarize: ${steps.fetch.output}"
collaboration_rules:
  max_concurrent_steps: 8
  retry:
    base_delay_ms: 100
    max_delay_ms: 5000
  escalation_threshold: 3
  skipped_step_placeholder: true
"#;
        let doc = ConfigDocument::from_yaml(yaml).unwrap();
        assert_eq!(doc.version, "2.0");
        assert_eq!(doc.agents[0].max_retries, 5);
        assert_eq!(doc.agents[1].capabilities.len(), 0);
        let step = &doc.workflows[0].steps[1];
        assert!(!step.required);
        assert!(!step.retry_on_failure);
        assert_eq!(step.dependencies, vec!["fetch".to_string()]);
        assert!(step.input.as_deref().unwrap().contains("${steps.fetch.output}"));
        assert_eq!(doc.collaboration_rules.max_concurrent_steps, 8);
        assert_eq!(doc.collaboration_rules.retry.base_delay_ms, 100);
        assert!(doc.collaboration_rules.skipped_step_placeholder);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            base_delay_ms: 500,
            max_delay_ms: 4000,
        };
        assert_eq!(policy.delay_for_attempt(0).as_millis(), 500);
        assert_eq!(policy.delay_for_attempt(1).as_millis(), 1000);
        assert_eq!(policy.delay_for_attempt(2).as_millis(), 2000);
        assert_eq!(policy.delay_for_attempt(3).as_millis(), 4000);
        assert_eq!(policy.delay_for_attempt(30).as_millis(), 4000);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = ConfigDocument::from_yaml("agents: [").unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }
}
