//! Degradation controller — single-call simulation of the full pipeline.
//!
//! Invoked by the scheduler when a required step exhausts its retries with
//! a `ResourceNotFoundError` or `CollaborationError` (never for validation
//! or timeout-only failures). One consolidated request asks a single
//! capable executor to emulate the remaining roles in one pass; the result
//! matches the normal response contract except for the `degraded` marker
//! and the recorded original failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::OrchestratorError;
use crate::executor::{execute_bounded, AgentExecutor, ExecutorError, StepInput};
use crate::model::{ErrorDescriptor, StepTrace, TaskInstance, TaskResult};
use crate::registry::AgentDefinition;

const SIMULATOR_AGENT_NAME: &str = "pipeline-simulator";

pub struct DegradationController {
    executor: Arc<dyn AgentExecutor>,
    /// Cap for the recorded error message
    max_error_len: usize,
}

impl DegradationController {
    pub fn new(executor: Arc<dyn AgentExecutor>, max_error_len: usize) -> Self {
        Self {
            executor,
            max_error_len,
        }
    }

    /// Produce a terminal result for the task by emulating the pipeline in
    /// one consolidated call. On failure of the degraded call itself, the
    /// returned error records both causes.
    pub async fn synthesize(
        &self,
        task: &TaskInstance,
        original: &ExecutorError,
    ) -> Result<TaskResult, OrchestratorError> {
        tracing::warn!(
            task_id = %task.id,
            workflow = %task.workflow.name,
            original = original.kind(),
            "Degrading to single-call pipeline simulation"
        );

        let simulator = self.simulator_agent(task);
        let prompt = build_simulation_prompt(task);
        let input = StepInput {
            task_id: task.id.clone(),
            step_name: SIMULATOR_AGENT_NAME.to_string(),
            prompt,
        };

        let started = Instant::now();
        match execute_bounded(self.executor.as_ref(), &simulator, &input).await {
            Ok(output) => {
                // keep the trace of steps that did succeed, then the
                // consolidated entry
                let mut trace = task.trace.clone();
                trace.push(StepTrace {
                    step: SIMULATOR_AGENT_NAME.to_string(),
                    agent: SIMULATOR_AGENT_NAME.to_string(),
                    output: output.content.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Ok(TaskResult {
                    final_text: output.content,
                    trace,
                    degraded: true,
                    error: Some(ErrorDescriptor::new(
                        original.kind(),
                        &original.to_string(),
                        self.max_error_len,
                    )),
                })
            }
            Err(degraded_err) => {
                tracing::error!(
                    task_id = %task.id,
                    original = %original,
                    degraded = %degraded_err,
                    "Degraded call failed as well"
                );
                Err(OrchestratorError::Degradation {
                    original: format!("{}: {}", original.kind(), original),
                    degraded: format!("{}: {}", degraded_err.kind(), degraded_err),
                })
            }
        }
    }

    /// Synthetic profile for the consolidated call: union of the workflow's
    /// capabilities, generous timeout, no retries of its own.
    fn simulator_agent(&self, task: &TaskInstance) -> AgentDefinition {
        let mut capabilities: Vec<String> = Vec::new();
        let mut timeout = Duration::from_secs(60);
        for step in &task.workflow.steps {
            for cap in &step.agent.capabilities {
                if !capabilities.contains(cap) {
                    capabilities.push(cap.clone());
                }
            }
            let doubled = step.agent.timeout * 2;
            if doubled > timeout {
                timeout = doubled;
            }
        }
        AgentDefinition {
            name: SIMULATOR_AGENT_NAME.to_string(),
            role: "Pipeline Simulator".to_string(),
            capabilities,
            max_retries: 0,
            timeout,
            priority: 0,
        }
    }
}

/// Consolidated prompt asking one executor to emulate every pipeline role
/// in sequence.
fn build_simulation_prompt(task: &TaskInstance) -> String {
    let mut prompt = String::from(
        "The multi-agent pipeline below could not run collaboratively. \
         Emulate it yourself: work through each role in order and \
         synthesize one final answer.\n\n",
    );

    prompt.push_str("## Pipeline roles\n");
    for (i, step) in task.workflow.steps.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. **{}** ({}) — step '{}'{}\n",
            i + 1,
            step.agent.name,
            step.agent.role,
            step.name,
            if step.required { "" } else { " [optional]" }
        ));
    }

    prompt.push_str(&format!("\n## Request\n{}\n", task.user_input));

    if !task.context.is_empty() {
        prompt.push_str(&format!(
            "\n## Output already produced by completed steps\n{}\n",
            task.context.digest()
        ));
    }

    prompt.push_str(
        "\nShow each role's contribution briefly, then give the final \
         response the last role would have produced.",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::executor::StepOutput;
    use crate::model::{TaskInstance, TaskPriority};
    use crate::registry::{StepDefinition, WorkflowDefinition};

    struct ScriptedExecutor {
        outcomes: Mutex<VecDeque<Result<StepOutput, ExecutorError>>>,
    }

    #[async_trait]
    impl AgentExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _agent: &AgentDefinition,
            _input: &StepInput,
        ) -> Result<StepOutput, ExecutorError> {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(StepOutput {
                        content: "simulated".to_string(),
                        model: None,
                    })
                })
        }
    }

    fn sample_task() -> TaskInstance {
        let agent = Arc::new(AgentDefinition {
            name: "fetcher".to_string(),
            role: "Data Retrieval Specialist".to_string(),
            capabilities: vec!["search".to_string()],
            max_retries: 3,
            timeout: Duration::from_secs(30),
            priority: 1,
        });
        let workflow = Arc::new(WorkflowDefinition {
            name: "default".to_string(),
            description: None,
            steps: vec![StepDefinition {
                name: "fetch".to_string(),
                agent,
                required: true,
                dependencies: vec![],
                retry_on_failure: true,
                input: None,
                index: 0,
            }],
        });
        TaskInstance::new(
            "t-1".to_string(),
            workflow,
            "what happened today?".to_string(),
            TaskPriority::Normal,
        )
    }

    #[tokio::test]
    async fn test_degraded_result_keeps_contract_shape() {
        let executor = Arc::new(ScriptedExecutor {
            outcomes: Mutex::new(VecDeque::from([Ok(StepOutput {
                content: "one-pass answer".to_string(),
                model: None,
            })])),
        });
        let controller = DegradationController::new(executor, 128);
        let task = sample_task();
        let original = ExecutorError::ResourceNotFound("deployment missing".to_string());

        let result = controller.synthesize(&task, &original).await.unwrap();
        assert!(result.degraded);
        assert_eq!(result.final_text, "one-pass answer");
        assert_eq!(result.trace.len(), 1);
        assert_eq!(result.trace[0].step, "pipeline-simulator");
        let error = result.error.unwrap();
        assert_eq!(error.kind, "ResourceNotFoundError");
        assert!(error.message.contains("deployment missing"));
    }

    #[tokio::test]
    async fn test_degraded_failure_records_both_causes() {
        let executor = Arc::new(ScriptedExecutor {
            outcomes: Mutex::new(VecDeque::from([Err(ExecutorError::Collaboration(
                "simulation also broke".to_string(),
            ))])),
        });
        let controller = DegradationController::new(executor, 128);
        let task = sample_task();
        let original = ExecutorError::Collaboration("group chat fell apart".to_string());

        let err = controller.synthesize(&task, &original).await.unwrap_err();
        match err {
            OrchestratorError::Degradation { original, degraded } => {
                assert!(original.contains("group chat fell apart"));
                assert!(degraded.contains("simulation also broke"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_simulation_prompt_lists_roles_in_order() {
        let task = sample_task();
        let prompt = build_simulation_prompt(&task);
        assert!(prompt.contains("1. **fetcher** (Data Retrieval Specialist)"));
        assert!(prompt.contains("what happened today?"));
    }
}
