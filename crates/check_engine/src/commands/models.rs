//! Models command - inspects published versions and rolls back.

use anyhow::Result;
use check_structs::{ModelScope, Segment};
use model_registry::ModelRegistry;
use tracing::info;
use uuid::Uuid;

/// Lists every published version of a scope, oldest first.
///
/// # Errors
///
/// Returns an error if the registry cannot be listed.
pub async fn list(registry: &ModelRegistry, brand_id: Uuid, segment: Option<Segment>) -> Result<()> {
    let scope = ModelScope { brand_id, segment };
    let versions = registry.list_versions(&scope).await?;
    let latest = registry.load(&scope).await;

    if versions.is_empty() {
        info!(scope = %scope, "No published models");
        return Ok(());
    }

    info!(scope = %scope, versions = versions.len(), "=== Published Models ===");
    for metadata in versions {
        let marker = if latest
            .as_ref()
            .is_some_and(|m| m.metadata.version == metadata.version)
        {
            "*"
        } else {
            " "
        };
        info!(
            "{marker} {} trained {} samples {} precision {:.3} recall {:.3} f1 {:.3}{}",
            metadata.version,
            metadata.trained_at.format("%Y-%m-%d %H:%M"),
            metadata.sample_count,
            metadata.metrics.precision,
            metadata.metrics.recall,
            metadata.metrics.f1,
            if metadata.passed_quality_gate {
                ""
            } else {
                " (below thresholds)"
            }
        );
    }
    Ok(())
}

/// Makes `version` the latest model of a scope.
///
/// # Errors
///
/// Returns an error if the version does not exist or the copy fails.
pub async fn rollback(
    registry: &ModelRegistry,
    brand_id: Uuid,
    segment: Option<Segment>,
    version: &str,
) -> Result<()> {
    let scope = ModelScope { brand_id, segment };
    let metadata = registry.promote(&scope, version).await?;
    info!(
        scope = %scope,
        version = %metadata.version,
        trained_at = %metadata.trained_at,
        "Rolled back latest model"
    );
    Ok(())
}
