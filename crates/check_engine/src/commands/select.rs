//! Select command - previews the checks a store would get in its next run.

use anyhow::{Context, Result};
use check_structs::{HistorySource, Template};
use tracing::info;
use uuid::Uuid;

use crate::selector::Selector;

/// Runs the select command.
///
/// # Errors
///
/// Returns an error if the store is unknown or its history cannot be read.
pub async fn run(
    selector: &Selector,
    history: &dyn HistorySource,
    store_id: Uuid,
    count: usize,
) -> Result<()> {
    let store = history
        .store(store_id)
        .await?
        .with_context(|| format!("Store {store_id} not found"))?;

    let arena = history.templates_for_brand(store.brand_id).await?;
    let candidates: Vec<Template> = arena.current().cloned().collect();
    info!(store = %store.name, candidates = candidates.len(), count, "Selecting checks");

    let selected = selector.select(&store, &candidates, count).await?;

    info!("=== Selected Checks ===");
    for (rank, check) in selected.iter().enumerate() {
        let title = arena
            .get(check.template_id)
            .map_or("<unknown>", |t| t.title.as_str());
        info!(
            "  {}. {} - score {:.3}, photo: {} ({:?})",
            rank + 1,
            title,
            check.score,
            if check.photo_required { "yes" } else { "no" },
            check.reason
        );
    }

    Ok(())
}
