//! Cohort Core — transport-agnostic multi-agent pipeline orchestration.
//!
//! This crate contains the orchestration domain: declarative workflow
//! definitions, the task lifecycle state machine, the dependency resolver
//! and scheduler, the agent executor boundary, and the degradation
//! controller. It has **no HTTP framework dependency**, making it suitable
//! for use behind any caller that submits task requests and polls status:
//!
//! - CLI tools (via `cohort-cli`)
//! - HTTP servers
//! - embedded schedulers
//!
//! Control flow: the registry supplies a validated workflow, the resolver
//! computes execution order, the scheduler creates per-step dispatches
//! driven by the state machine, the executor performs each step, and on a
//! classified failure the degradation controller produces a terminal
//! result directly.

pub mod config;
pub mod context;
pub mod db;
pub mod degradation;
pub mod error;
pub mod executor;
pub mod machine;
pub mod model;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod telemetry;

// Convenience re-exports
pub use config::ConfigDocument;
pub use db::Database;
pub use error::OrchestratorError;
pub use registry::WorkflowRegistry;
pub use scheduler::{Scheduler, SubmitRequest};
