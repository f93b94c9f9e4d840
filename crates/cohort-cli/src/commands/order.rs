//! `cohort order` — Show a workflow's computed execution order.

use console::style;

use cohort_core::resolver;

/// Print the deterministic topological order for one workflow.
pub async fn run(config_path: &str, workflow_name: &str) -> Result<(), String> {
    let registry = super::load_registry(config_path)?;
    let workflow = registry.workflow(workflow_name).map_err(|e| e.to_string())?;
    let order = resolver::execution_order(&workflow).map_err(|e| e.to_string())?;

    println!(
        "Execution order for workflow {}:",
        style(workflow_name).cyan().bold()
    );
    for (position, &idx) in order.iter().enumerate() {
        let step = &workflow.steps[idx];
        println!(
            "  {}. {} [agent: {}, priority {}]",
            position + 1,
            step.name,
            step.agent.name,
            step.agent.priority
        );
    }

    Ok(())
}
