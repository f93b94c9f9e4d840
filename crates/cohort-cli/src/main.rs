//! Cohort CLI — command-line interface for the multi-agent pipeline
//! orchestrator.
//!
//! The CLI is a demo caller for cohort-core: it validates declaration
//! documents, shows a workflow's computed execution order, and drives one
//! task end-to-end against the HTTP agent executor.

use clap::{Parser, Subcommand};

use cohort_cli::commands;

/// Cohort CLI — multi-agent pipeline orchestration
#[derive(Parser)]
#[command(name = "cohort", version, about = "Cohort CLI — multi-agent pipeline orchestration")]
struct Cli {
    /// Path to the declaration document (agents, workflows, rules)
    #[arg(long, env = "COHORT_CONFIG", default_value = "config/cohort.yaml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the declaration document without executing anything
    Validate,

    /// Show the computed execution order for a workflow
    Order {
        /// Workflow name
        #[arg(long, default_value = "default")]
        workflow: String,
    },

    /// Run one workflow task to completion and print the result
    Run {
        /// Workflow name
        #[arg(long, default_value = "default")]
        workflow: String,

        /// User input handed to the pipeline
        #[arg(long)]
        input: String,

        /// Task ID (generated when omitted)
        #[arg(long)]
        task_id: Option<String>,

        /// SQLite database path for task snapshots
        #[arg(long, env = "COHORT_DB_PATH", default_value = "cohort.db")]
        db: String,

        /// Show the full step trace, not just the final text
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Show the archived status of a task
    Status {
        /// Task ID
        #[arg(long)]
        task_id: String,

        /// SQLite database path for task snapshots
        #[arg(long, env = "COHORT_DB_PATH", default_value = "cohort.db")]
        db: String,

        /// Print the raw status JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cohort_core=warn,cohort_cli=info".into()),
        )
        .init();

    let result = match cli.command {
        Commands::Validate => commands::validate::run(&cli.config).await,
        Commands::Order { workflow } => commands::order::run(&cli.config, &workflow).await,
        Commands::Run {
            workflow,
            input,
            task_id,
            db,
            verbose,
        } => commands::run::run(&cli.config, &workflow, &input, task_id, &db, verbose).await,
        Commands::Status { task_id, db, json } => {
            commands::status::run(&task_id, &db, json).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
