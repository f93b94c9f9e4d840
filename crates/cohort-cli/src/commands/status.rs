//! `cohort status` — Show the archived status of a task.

use chrono::{DateTime, Utc};
use console::style;

use cohort_core::db::Database;
use cohort_core::store::TaskStore;

pub async fn run(task_id: &str, db_path: &str, json: bool) -> Result<(), String> {
    let store = TaskStore::new(Database::open(db_path).map_err(|e| e.to_string())?);
    let snapshot = store
        .get(task_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("task '{}' not found in {}", task_id, db_path))?;

    if json {
        let status = snapshot.status();
        println!(
            "{}",
            serde_json::to_string_pretty(&status).map_err(|e| e.to_string())?
        );
        return Ok(());
    }

    println!(
        "Task {} [workflow: {}]",
        style(task_id).cyan().bold(),
        snapshot.workflow_name
    );
    println!("  State     : {}", snapshot.state);
    println!("  Degraded  : {}", snapshot.degraded);
    println!("  Created   : {}", format_time(Some(snapshot.created_at)));
    println!("  Completed : {}", format_time(snapshot.completed_at));
    println!();
    for (step, record) in &snapshot.steps {
        println!(
            "  {:<20} {:?} (attempts: {})",
            step, record.status, record.attempts
        );
        if let Some(error) = &record.last_error {
            println!("  {:<20} last error: {}", "", error);
        }
    }
    if let Some(error) = &snapshot.error {
        println!();
        println!(
            "  {} {}: {}",
            style("error").red().bold(),
            error.kind,
            error.message
        );
    }

    Ok(())
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "—".to_string())
}
