//! Workflow registry — validated, typed definitions behind an atomically
//! swappable snapshot.
//!
//! `WorkflowRegistry::load` rejects a declaration document wholesale when a
//! step references an undeclared agent, a dependency references an
//! undeclared step, or the dependency graph contains a cycle. Validation
//! resolves agent references into `Arc<AgentDefinition>` once, so no string
//! lookup can fail after load.
//!
//! Readers take an `Arc<RegistrySnapshot>`; `reload` publishes a new
//! snapshot without touching the one in-flight tasks captured at creation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::{CollaborationRules, ConfigDocument};
use crate::error::OrchestratorError;
use crate::resolver;

/// Immutable agent capability profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefinition {
    pub name: String,
    pub role: String,
    pub capabilities: Vec<String>,
    pub max_retries: u32,
    pub timeout: Duration,
    pub priority: u8,
}

/// One validated step: the agent reference is typed, not a string.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub name: String,
    pub agent: Arc<AgentDefinition>,
    pub required: bool,
    pub dependencies: Vec<String>,
    pub retry_on_failure: bool,
    pub input: Option<String>,
    /// Declaration position, used for deterministic tie-breaking
    pub index: usize,
}

/// Validated workflow definition.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// One published, read-only validated definition set.
#[derive(Debug)]
pub struct RegistrySnapshot {
    agents: HashMap<String, Arc<AgentDefinition>>,
    workflows: HashMap<String, Arc<WorkflowDefinition>>,
    pub rules: CollaborationRules,
}

impl RegistrySnapshot {
    pub fn workflow(&self, name: &str) -> Result<Arc<WorkflowDefinition>, OrchestratorError> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("workflow '{}'", name)))
    }

    pub fn agent(&self, name: &str) -> Result<Arc<AgentDefinition>, OrchestratorError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent '{}'", name)))
    }

    pub fn workflow_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workflows.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }
}

/// Process-wide, read-mostly registry.
#[derive(Debug)]
pub struct WorkflowRegistry {
    inner: RwLock<Arc<RegistrySnapshot>>,
}

impl WorkflowRegistry {
    /// Validate a declaration document and publish the initial snapshot.
    pub fn load(doc: ConfigDocument) -> Result<Self, OrchestratorError> {
        let snapshot = build_snapshot(doc)?;
        Ok(Self {
            inner: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Validate a new document and atomically swap the published snapshot.
    ///
    /// In-flight tasks keep the workflow Arc captured at their creation.
    pub fn reload(&self, doc: ConfigDocument) -> Result<(), OrchestratorError> {
        let snapshot = Arc::new(build_snapshot(doc)?);
        let mut guard = self
            .inner
            .write()
            .map_err(|e| OrchestratorError::Internal(format!("registry lock poisoned: {}", e)))?;
        *guard = snapshot;
        tracing::info!("Workflow registry reloaded");
        Ok(())
    }

    /// Current published snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner
            .read()
            .map(|g| g.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn workflow(&self, name: &str) -> Result<Arc<WorkflowDefinition>, OrchestratorError> {
        self.snapshot().workflow(name)
    }

    pub fn agent(&self, name: &str) -> Result<Arc<AgentDefinition>, OrchestratorError> {
        self.snapshot().agent(name)
    }
}

/// Validate the raw document and build a typed snapshot.
fn build_snapshot(doc: ConfigDocument) -> Result<RegistrySnapshot, OrchestratorError> {
    if doc.agents.is_empty() {
        return Err(OrchestratorError::Config(
            "at least one agent must be declared".to_string(),
        ));
    }
    if doc.workflows.is_empty() {
        return Err(OrchestratorError::Config(
            "at least one workflow must be declared".to_string(),
        ));
    }

    let mut agents: HashMap<String, Arc<AgentDefinition>> = HashMap::new();
    for spec in &doc.agents {
        let def = Arc::new(AgentDefinition {
            name: spec.name.clone(),
            role: spec.role.clone(),
            capabilities: spec.capabilities.clone(),
            max_retries: spec.max_retries,
            timeout: Duration::from_secs(spec.timeout_seconds),
            priority: spec.priority,
        });
        if agents.insert(spec.name.clone(), def).is_some() {
            return Err(OrchestratorError::Config(format!(
                "duplicate agent declaration '{}'",
                spec.name
            )));
        }
    }

    let mut workflows: HashMap<String, Arc<WorkflowDefinition>> = HashMap::new();
    for wf in &doc.workflows {
        let mut steps: Vec<StepDefinition> = Vec::with_capacity(wf.steps.len());
        for (index, step) in wf.steps.iter().enumerate() {
            if steps.iter().any(|s| s.name == step.name) {
                return Err(OrchestratorError::Config(format!(
                    "workflow '{}' declares step '{}' more than once",
                    wf.name, step.name
                )));
            }
            let agent = agents.get(&step.agent).cloned().ok_or_else(|| {
                OrchestratorError::Config(format!(
                    "workflow '{}' step '{}' references unknown agent '{}'",
                    wf.name, step.name, step.agent
                ))
            })?;
            steps.push(StepDefinition {
                name: step.name.clone(),
                agent,
                required: step.required,
                dependencies: step.dependencies.clone(),
                retry_on_failure: step.retry_on_failure,
                input: step.input.clone(),
                index,
            });
        }

        // Dependency names must resolve within the same workflow
        for step in &steps {
            for dep in &step.dependencies {
                if !steps.iter().any(|s| &s.name == dep) {
                    return Err(OrchestratorError::Config(format!(
                        "workflow '{}' step '{}' depends on undeclared step '{}'",
                        wf.name, step.name, dep
                    )));
                }
            }
        }

        if let Some(cycle) = resolver::find_cycle(&steps) {
            return Err(OrchestratorError::Config(format!(
                "workflow '{}' has a dependency cycle: {}",
                wf.name,
                cycle.join(" -> ")
            )));
        }

        let def = Arc::new(WorkflowDefinition {
            name: wf.name.clone(),
            description: wf.description.clone(),
            steps,
        });
        if workflows.insert(wf.name.clone(), def).is_some() {
            return Err(OrchestratorError::Config(format!(
                "duplicate workflow declaration '{}'",
                wf.name
            )));
        }
    }

    tracing::info!(
        agents = agents.len(),
        workflows = workflows.len(),
        "Declaration document validated"
    );

    Ok(RegistrySnapshot {
        agents,
        workflows,
        rules: doc.collaboration_rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigDocument;

    fn doc(yaml: &str) -> ConfigDocument {
        ConfigDocument::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_load_resolves_agent_references() {
        let registry = WorkflowRegistry::load(doc(r#"
agents:
  - name: fetcher
    role: "Data Retrieval Specialist"
    priority: 2
  - name: responder
    role: "Communication Expert"
workflows:
  - name: default
    steps:
      - name: fetch
        agent: fetcher
      - name: respond
        agent: responder
        dependencies: [fetch]
"#))
        .unwrap();

        let wf = registry.workflow("default").unwrap();
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps[0].agent.priority, 2);
        assert_eq!(wf.step("respond").unwrap().dependencies, vec!["fetch"]);
        assert!(registry.workflow("other").is_err());
    }

    #[test]
    fn test_unknown_agent_rejected() {
        let err = WorkflowRegistry::load(doc(r#"
agents:
  - name: fetcher
    role: r
workflows:
  - name: default
    steps:
      - name: fetch
        agent: missing
"#))
        .unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("unknown agent 'missing'"));
    }

    #[test]
    fn test_unknown_dependency_rejected_by_name() {
        let err = WorkflowRegistry::load(doc(r#"
agents:
  - name: a
    role: r
workflows:
  - name: default
    steps:
      - name: B
        agent: a
        dependencies: [Z]
"#))
        .unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("'Z'"));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = WorkflowRegistry::load(doc(r#"
agents:
  - name: a
    role: r
workflows:
  - name: default
    steps:
      - name: one
        agent: a
        dependencies: [two]
      - name: two
        agent: a
        dependencies: [one]
"#))
        .unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_reload_swaps_snapshot_atomically() {
        let registry = WorkflowRegistry::load(doc(r#"
agents:
  - name: a
    role: r
workflows:
  - name: default
    steps:
      - name: only
        agent: a
"#))
        .unwrap();

        // capture the pre-reload definition, as a task would at creation
        let captured = registry.workflow("default").unwrap();

        registry
            .reload(doc(r#"
agents:
  - name: a
    role: r
workflows:
  - name: default
    steps:
      - name: only
        agent: a
      - name: extra
        agent: a
        dependencies: [only]
"#))
            .unwrap();

        assert_eq!(captured.steps.len(), 1);
        assert_eq!(registry.workflow("default").unwrap().steps.len(), 2);
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let registry = WorkflowRegistry::load(doc(r#"
agents:
  - name: a
    role: r
workflows:
  - name: default
    steps:
      - name: only
        agent: a
"#))
        .unwrap();

        let err = registry
            .reload(doc(r#"
agents:
  - name: a
    role: r
workflows:
  - name: default
    steps:
      - name: only
        agent: nope
"#))
            .unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
        assert!(registry.workflow("default").is_ok());
    }
}
