//! `cohort validate` — Validate a declaration document.

use console::style;

/// Load the document, run full registry validation, and print a summary.
pub async fn run(config_path: &str) -> Result<(), String> {
    let registry = super::load_registry(config_path)?;
    let snapshot = registry.snapshot();

    println!(
        "{} {}",
        style("✓").green().bold(),
        style(format!("Declaration document '{}' is valid", config_path)).bold()
    );
    println!();
    println!("  Agents    : {}", snapshot.agent_count());
    println!("  Workflows : {}", snapshot.workflow_names().join(", "));
    println!(
        "  Rules     : {} concurrent steps, escalation after {} failures",
        snapshot.rules.max_concurrent_steps, snapshot.rules.escalation_threshold
    );

    for name in snapshot.workflow_names() {
        let workflow = snapshot.workflow(name).map_err(|e| e.to_string())?;
        println!();
        println!("  {} ({} steps)", style(name).cyan(), workflow.steps.len());
        for step in &workflow.steps {
            let deps = if step.dependencies.is_empty() {
                String::new()
            } else {
                format!("  ← {}", step.dependencies.join(", "))
            };
            println!(
                "    - {} [{}]{}{}",
                step.name,
                step.agent.name,
                if step.required { "" } else { " (optional)" },
                deps
            );
        }
    }

    Ok(())
}
