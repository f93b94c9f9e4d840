//! Agent executor boundary — invokes an agent via HTTP API.
//!
//! The scheduler never talks to a model directly; it goes through the
//! `AgentExecutor` trait so tests can script outcomes and production can
//! call an Anthropic-compatible messages endpoint. Every call is bounded
//! by the agent's configured timeout; a timed-out call is abandoned, not
//! awaited further.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::registry::AgentDefinition;

/// Classified step-level failure. Absorbed by the scheduler's retry and
/// degradation logic; only exhaustion surfaces as a task failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),

    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("collaboration failed: {0}")]
    Collaboration(String),
}

impl ExecutorError {
    /// Stable kind string for error descriptors and telemetry labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorError::Timeout(_) => "TimeoutError",
            ExecutorError::CapabilityUnavailable(_) => "CapabilityUnavailableError",
            ExecutorError::ResourceNotFound(_) => "ResourceNotFoundError",
            ExecutorError::Collaboration(_) => "CollaborationError",
        }
    }

    /// Whether a required step's terminal failure of this kind routes to
    /// the degradation controller instead of plain task failure.
    pub fn triggers_degradation(&self) -> bool {
        matches!(
            self,
            ExecutorError::ResourceNotFound(_) | ExecutorError::Collaboration(_)
        )
    }
}

/// Input handed to an executor for one step attempt.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub task_id: String,
    pub step_name: String,
    /// Fully resolved prompt (templates already substituted)
    pub prompt: String,
}

/// Output of a successful step attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    pub content: String,
    /// Model reported by the upstream provider, when known
    pub model: Option<String>,
}

/// Capability-indexed invocation boundary to an external agent call.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        agent: &AgentDefinition,
        input: &StepInput,
    ) -> Result<StepOutput, ExecutorError>;
}

/// Run one executor call bounded by the agent's configured timeout.
///
/// On timeout the in-flight future is dropped and the attempt reports
/// `TimeoutError` to the retry logic.
pub async fn execute_bounded(
    executor: &dyn AgentExecutor,
    agent: &AgentDefinition,
    input: &StepInput,
) -> Result<StepOutput, ExecutorError> {
    match tokio::time::timeout(agent.timeout, executor.execute(agent, input)).await {
        Ok(result) => result,
        Err(_) => Err(ExecutorError::Timeout(agent.timeout)),
    }
}

/// Configuration for the HTTP executor.
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// API base URL (Anthropic-compatible messages endpoint)
    pub base_url: String,
    /// API key / auth token
    pub api_key: String,
    /// Model ID
    pub model: String,
    /// Maximum tokens for each response
    pub max_tokens: u32,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("COHORT_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
            api_key: std::env::var("COHORT_API_KEY").unwrap_or_default(),
            model: std::env::var("COHORT_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            max_tokens: 2048,
        }
    }
}

/// Calls an agent via an Anthropic-compatible HTTP messages API.
///
/// POST {base_url}/v1/messages
/// Headers:
///   x-api-key: {api_key}
///   anthropic-version: 2023-06-01
///   content-type: application/json
pub struct HttpAgentExecutor {
    client: reqwest::Client,
    config: HttpExecutorConfig,
}

impl HttpAgentExecutor {
    pub fn new(config: HttpExecutorConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            config,
        }
    }

    /// System prompt derived from the agent's declared profile.
    fn system_prompt(agent: &AgentDefinition) -> String {
        let mut prompt = format!(
            "You are the '{}' agent, acting as {}.",
            agent.name, agent.role
        );
        if !agent.capabilities.is_empty() {
            prompt.push_str(&format!(
                " Your capabilities: {}.",
                agent.capabilities.join(", ")
            ));
        }
        prompt.push_str(" Produce focused output for your stage of the pipeline only.");
        prompt
    }
}

#[async_trait]
impl AgentExecutor for HttpAgentExecutor {
    async fn execute(
        &self,
        agent: &AgentDefinition,
        input: &StepInput,
    ) -> Result<StepOutput, ExecutorError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": Self::system_prompt(agent),
            "messages": [
                { "role": "user", "content": input.prompt }
            ]
        });

        tracing::debug!(
            agent = %agent.name,
            step = %input.step_name,
            task = %input.task_id,
            "Calling messages API: {}",
            url
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| ExecutorError::Collaboration(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, &response_text));
        }

        let json: serde_json::Value = serde_json::from_str(&response_text).map_err(|e| {
            ExecutorError::Collaboration(format!("failed to parse response JSON: {}", e))
        })?;

        // Extract text blocks from the Anthropic response format
        let content = json
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| {
                arr.iter()
                    .filter_map(|block| {
                        if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                            block.get("text").and_then(|t| t.as_str()).map(String::from)
                        } else {
                            None
                        }
                    })
                    .reduce(|a, b| format!("{}\n{}", a, b))
            })
            .unwrap_or_default();

        let model = json
            .get("model")
            .and_then(|m| m.as_str())
            .map(String::from);

        Ok(StepOutput { content, model })
    }
}

fn classify_transport_error(e: reqwest::Error) -> ExecutorError {
    if e.is_timeout() {
        // the outer execute_bounded timeout usually fires first; this
        // covers connect-level timeouts below it
        ExecutorError::Timeout(Duration::from_secs(0))
    } else if e.is_connect() {
        ExecutorError::CapabilityUnavailable(format!("connection failed: {}", e))
    } else {
        ExecutorError::Collaboration(format!("HTTP request failed: {}", e))
    }
}

/// Map upstream HTTP status codes onto the failure taxonomy.
fn classify_status(status: reqwest::StatusCode, body: &str) -> ExecutorError {
    use reqwest::StatusCode;
    match status {
        StatusCode::NOT_FOUND => {
            ExecutorError::ResourceNotFound(format!("provider returned 404: {}", body))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            ExecutorError::CapabilityUnavailable(format!("provider returned {}: {}", status, body))
        }
        other => ExecutorError::Collaboration(format!("provider returned {}: {}", other, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn agent_with_timeout(ms: u64) -> AgentDefinition {
        AgentDefinition {
            name: "fetcher".to_string(),
            role: "Data Retrieval Specialist".to_string(),
            capabilities: vec!["search".to_string()],
            max_retries: 1,
            timeout: Duration::from_millis(ms),
            priority: 1,
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl AgentExecutor for SlowExecutor {
        async fn execute(
            &self,
            _agent: &AgentDefinition,
            _input: &StepInput,
        ) -> Result<StepOutput, ExecutorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StepOutput {
                content: "late".to_string(),
                model: None,
            })
        }
    }

    #[tokio::test]
    async fn test_execute_bounded_abandons_slow_calls() {
        let agent = agent_with_timeout(20);
        let input = StepInput {
            task_id: "t".to_string(),
            step_name: "fetch".to_string(),
            prompt: "go".to_string(),
        };
        let executor: Arc<dyn AgentExecutor> = Arc::new(SlowExecutor);
        let err = execute_bounded(executor.as_ref(), &agent, &input)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TimeoutError");
    }

    #[test]
    fn test_status_classification() {
        let nf = classify_status(reqwest::StatusCode::NOT_FOUND, "no deployment");
        assert_eq!(nf.kind(), "ResourceNotFoundError");
        assert!(nf.triggers_degradation());

        let busy = classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "busy");
        assert_eq!(busy.kind(), "CapabilityUnavailableError");
        assert!(!busy.triggers_degradation());

        let other = classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(other.kind(), "CollaborationError");
        assert!(other.triggers_degradation());
    }

    #[test]
    fn test_system_prompt_includes_profile() {
        let prompt = HttpAgentExecutor::system_prompt(&agent_with_timeout(100));
        assert!(prompt.contains("fetcher"));
        assert!(prompt.contains("Data Retrieval Specialist"));
        assert!(prompt.contains("search"));
    }
}
