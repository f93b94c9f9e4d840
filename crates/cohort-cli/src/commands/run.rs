//! `cohort run` — Drive one workflow task to completion.

use std::sync::Arc;

use console::style;

use cohort_core::db::Database;
use cohort_core::executor::{HttpAgentExecutor, HttpExecutorConfig};
use cohort_core::machine::TaskState;
use cohort_core::model::TaskPriority;
use cohort_core::scheduler::{Scheduler, SubmitRequest};
use cohort_core::store::TaskStore;
use cohort_core::telemetry::TracingTelemetry;

pub async fn run(
    config_path: &str,
    workflow_name: &str,
    input: &str,
    task_id: Option<String>,
    db_path: &str,
    verbose: bool,
) -> Result<(), String> {
    let registry = super::load_registry(config_path)?;
    let task_id = task_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let executor = Arc::new(HttpAgentExecutor::new(HttpExecutorConfig::default()));
    let store = TaskStore::new(Database::open(db_path).map_err(|e| e.to_string())?);
    let scheduler = Scheduler::new(registry, executor, Arc::new(TracingTelemetry), store);

    println!(
        "Running workflow {} (task {})",
        style(workflow_name).cyan().bold(),
        style(&task_id).dim()
    );

    scheduler
        .submit(SubmitRequest {
            task_id: task_id.clone(),
            workflow_name: workflow_name.to_string(),
            user_input: input.to_string(),
            priority: TaskPriority::Normal,
        })
        .await
        .map_err(|e| e.to_string())?;
    tracing::info!(task_id = %task_id, workflow = workflow_name, "task submitted");

    let status = scheduler.wait(&task_id).await.map_err(|e| e.to_string())?;

    println!();
    for (step, step_status) in &status.per_step_status {
        let marker = match step_status {
            cohort_core::model::StepStatus::Succeeded => style("✓").green(),
            cohort_core::model::StepStatus::Skipped => style("⏭").yellow(),
            cohort_core::model::StepStatus::Failed => style("✗").red(),
            _ => style("·").dim(),
        };
        println!("  {} {}", marker, step);
    }
    println!();

    match status.state {
        TaskState::Completed => {
            let result = status
                .result
                .ok_or_else(|| "completed task without a result".to_string())?;
            if result.degraded {
                println!(
                    "{} {}",
                    style("⚠").yellow().bold(),
                    style("Pipeline degraded to single-call simulation").yellow()
                );
                if let Some(error) = &result.error {
                    println!("  cause: {} — {}", error.kind, error.message);
                }
                println!();
            }
            if verbose {
                for entry in &result.trace {
                    println!(
                        "── {} ({}, {} ms) ──",
                        style(&entry.step).cyan(),
                        entry.agent,
                        entry.duration_ms
                    );
                    println!("{}", entry.output);
                    println!();
                }
            }
            println!("{}", style("Final response:").bold());
            println!("{}", result.final_text);
            Ok(())
        }
        TaskState::Cancelled => Err("task was cancelled".to_string()),
        _ => {
            let detail = status
                .error
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or_else(|| "unknown failure".to_string());
            Err(format!("task failed — {}", detail))
        }
    }
}
