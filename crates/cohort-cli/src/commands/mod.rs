pub mod order;
pub mod run;
pub mod status;
pub mod validate;

use std::sync::Arc;

use cohort_core::{ConfigDocument, WorkflowRegistry};

/// Load and validate the declaration document into a registry.
pub fn load_registry(config_path: &str) -> Result<Arc<WorkflowRegistry>, String> {
    let doc = ConfigDocument::from_file(config_path).map_err(|e| e.to_string())?;
    let registry = WorkflowRegistry::load(doc).map_err(|e| e.to_string())?;
    Ok(Arc::new(registry))
}
