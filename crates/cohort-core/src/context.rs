//! Per-task execution context.
//!
//! Each completed step may append output that later steps (and the final
//! response) can read. The context is owned by one task instance and never
//! shared across tasks.

use serde::{Deserialize, Serialize};

/// One accumulated step output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Step that produced the output
    pub step: String,
    /// Agent bound to that step
    pub agent: String,
    /// The produced output text
    pub output: String,
    /// True for placeholder entries contributed by skipped optional steps
    #[serde(default)]
    pub placeholder: bool,
}

/// Ordered accumulator of step outputs, threaded through the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: Vec<ContextEntry>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed step's output.
    pub fn record(&mut self, step: &str, agent: &str, output: String) {
        self.entries.push(ContextEntry {
            step: step.to_string(),
            agent: agent.to_string(),
            output,
            placeholder: false,
        });
    }

    /// Append a placeholder entry for a skipped optional step.
    pub fn record_placeholder(&mut self, step: &str, agent: &str) {
        self.entries.push(ContextEntry {
            step: step.to_string(),
            agent: agent.to_string(),
            output: format!("[step '{}' skipped — no output]", step),
            placeholder: true,
        });
    }

    /// Output of a named step, if present.
    pub fn output_of(&self, step: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.step == step)
            .map(|e| e.output.as_str())
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Output of the last non-placeholder entry (the pipeline's final text).
    pub fn last_output(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| !e.placeholder)
            .map(|e| e.output.as_str())
    }

    /// Joined digest of all accumulated outputs, used as default step input
    /// and in the degradation prompt.
    pub fn digest(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("## {} ({})\n{}", e.step, e.agent, e.output))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Resolve template variables in a step input string.
    ///
    /// Supported patterns:
    /// - `${task.input}` — the original task input
    /// - `${steps.<StepName>.output}` — output from a completed step
    ///
    /// Unresolved references are left in place so failures are visible in
    /// the produced prompt rather than silently dropped.
    pub fn resolve_template(&self, template: &str, task_input: &str) -> String {
        let mut result = template.replace("${task.input}", task_input);

        let step_re = regex::Regex::new(r"\$\{steps\.([^.}]+)\.output\}")
            .expect("static pattern");
        result = step_re
            .replace_all(&result, |caps: &regex::Captures| {
                let step_name = &caps[1];
                self.output_of(step_name)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("${{steps.{}.output}}", step_name))
            })
            .to_string();

        result
    }
}
