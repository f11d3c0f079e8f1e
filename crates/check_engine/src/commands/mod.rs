//! CLI command implementations.

pub mod models;
pub mod select;
pub mod train;

use std::sync::Arc;

use config::EngineConfig;
use model_registry::ModelRegistry;

/// Builds the model registry over the configured object store.
///
/// # Errors
///
/// Returns an error if the object store cannot be opened.
pub fn open_registry(config: &EngineConfig) -> anyhow::Result<Arc<ModelRegistry>> {
    let base_path = config::get_model_store_path();
    let remote = config::build_object_store(&base_path)?;
    Ok(Arc::new(ModelRegistry::new(remote, &config.registry)))
}
