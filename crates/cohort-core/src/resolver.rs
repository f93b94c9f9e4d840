//! Dependency graph resolver.
//!
//! Derives a deterministic execution order for a workflow's steps from the
//! declared dependency edges. Ties between steps with no mutual dependency
//! break by ascending agent priority, then declaration order.

use std::collections::HashMap;

use crate::error::OrchestratorError;
use crate::registry::{StepDefinition, WorkflowDefinition};

/// Detect a dependency cycle via depth-first traversal with a
/// recursion-stack check. Returns the offending path when one exists.
pub fn find_cycle(steps: &[StepDefinition]) -> Option<Vec<String>> {
    let index_of: HashMap<&str, usize> =
        steps.iter().enumerate().map(|(i, s)| (s.name.as_str(), i)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit(
        idx: usize,
        steps: &[StepDefinition],
        index_of: &HashMap<&str, usize>,
        marks: &mut [Mark],
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        marks[idx] = Mark::OnStack;
        stack.push(steps[idx].name.clone());

        for dep in &steps[idx].dependencies {
            // unknown names are reported by registry validation, not here
            let Some(&dep_idx) = index_of.get(dep.as_str()) else {
                continue;
            };
            match marks[dep_idx] {
                Mark::OnStack => {
                    let mut path = stack.clone();
                    path.push(dep.clone());
                    return Some(path);
                }
                Mark::Unvisited => {
                    if let Some(path) = visit(dep_idx, steps, index_of, marks, stack) {
                        return Some(path);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[idx] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; steps.len()];
    let mut stack = Vec::new();
    for idx in 0..steps.len() {
        if marks[idx] == Mark::Unvisited {
            if let Some(path) = visit(idx, steps, &index_of, &mut marks, &mut stack) {
                return Some(path);
            }
        }
    }
    None
}

/// Topological order of a workflow's steps, as indices into
/// `workflow.steps`.
///
/// Kahn's algorithm; among the ready set, lower agent priority dispatches
/// first, with declaration order as the final tie-break, so the order is
/// fully deterministic.
pub fn execution_order(workflow: &WorkflowDefinition) -> Result<Vec<usize>, OrchestratorError> {
    let steps = &workflow.steps;
    let index_of: HashMap<&str, usize> =
        steps.iter().enumerate().map(|(i, s)| (s.name.as_str(), i)).collect();

    let mut in_degree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (idx, step) in steps.iter().enumerate() {
        for dep in &step.dependencies {
            let dep_idx = *index_of.get(dep.as_str()).ok_or_else(|| {
                OrchestratorError::Config(format!(
                    "workflow '{}' step '{}' depends on undeclared step '{}'",
                    workflow.name, step.name, dep
                ))
            })?;
            in_degree[idx] += 1;
            dependents[dep_idx].push(idx);
        }
    }

    let mut ready: Vec<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());

    while !ready.is_empty() {
        ready.sort_by_key(|&i| (steps[i].agent.priority, steps[i].index));
        let next = ready.remove(0);
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() != steps.len() {
        return Err(OrchestratorError::Config(format!(
            "workflow '{}' has a dependency cycle",
            workflow.name
        )));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::registry::AgentDefinition;

    fn agent(name: &str, priority: u8) -> Arc<AgentDefinition> {
        Arc::new(AgentDefinition {
            name: name.to_string(),
            role: "test".to_string(),
            capabilities: vec![],
            max_retries: 1,
            timeout: Duration::from_secs(5),
            priority,
        })
    }

    fn step(name: &str, agent: Arc<AgentDefinition>, deps: &[&str], index: usize) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            agent,
            required: true,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            retry_on_failure: true,
            input: None,
            index,
        }
    }

    fn workflow(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test".to_string(),
            description: None,
            steps,
        }
    }

    #[test]
    fn test_linear_chain_order() {
        let a = agent("a", 1);
        let wf = workflow(vec![
            step("fetch", a.clone(), &[], 0),
            step("summarize", a.clone(), &["fetch"], 1),
            step("respond", a.clone(), &["summarize"], 2),
        ]);
        assert_eq!(execution_order(&wf).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_ties_break_by_priority_then_declaration() {
        let high = agent("high", 1);
        let low = agent("low", 5);
        // declared low-priority first; priority wins the tie
        let wf = workflow(vec![
            step("slow", low.clone(), &[], 0),
            step("fast", high.clone(), &[], 1),
            step("also_fast", high.clone(), &[], 2),
        ]);
        let order = execution_order(&wf).unwrap();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_diamond_respects_edges() {
        let a = agent("a", 1);
        let wf = workflow(vec![
            step("root", a.clone(), &[], 0),
            step("left", a.clone(), &["root"], 1),
            step("right", a.clone(), &["root"], 2),
            step("join", a.clone(), &["left", "right"], 3),
        ]);
        let order = execution_order(&wf).unwrap();
        let pos = |name: &str| {
            order
                .iter()
                .position(|&i| wf.steps[i].name == name)
                .unwrap()
        };
        assert_eq!(pos("root"), 0);
        assert!(pos("join") > pos("left"));
        assert!(pos("join") > pos("right"));
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let a = agent("a", 1);
        let steps = vec![
            step("one", a.clone(), &["three"], 0),
            step("two", a.clone(), &["one"], 1),
            step("three", a.clone(), &["two"], 2),
        ];
        let cycle = find_cycle(&steps).expect("cycle expected");
        assert!(cycle.len() >= 2);
        // the path closes on the step it started from
        assert_eq!(cycle.first(), cycle.last());

        let wf = workflow(steps);
        assert!(execution_order(&wf).is_err());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let a = agent("a", 1);
        let steps = vec![step("loop", a.clone(), &["loop"], 0)];
        assert!(find_cycle(&steps).is_some());
    }

    #[test]
    fn test_acyclic_graph_has_no_cycle() {
        let a = agent("a", 1);
        let steps = vec![
            step("fetch", a.clone(), &[], 0),
            step("respond", a.clone(), &["fetch"], 1),
        ];
        assert!(find_cycle(&steps).is_none());
    }
}
