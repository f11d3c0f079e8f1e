//! `PostgreSQL` implementation of [`HistorySource`].

use async_trait::async_trait;
use check_structs::{
    CheckCoverage, HistorySource, LocalPriorStats, ResponseRecord, RunRecord, Store, StoreHistory,
    Template, TemplateArena,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::rows::{StoreRow, TemplateRow};

/// Reads check history from the operational database.
#[derive(Debug, Clone)]
pub struct PgHistorySource {
    pool: PgPool,
}

impl PgHistorySource {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HistorySource for PgHistorySource {
    async fn brands(&self) -> anyhow::Result<Vec<Uuid>> {
        let brands = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT brand_id FROM stores ORDER BY brand_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(brands)
    }

    async fn store(&self, store_id: Uuid) -> anyhow::Result<Option<Store>> {
        let row = sqlx::query_as::<_, StoreRow>(
            "SELECT id, brand_id, name, segment FROM stores WHERE id = $1",
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Store::from))
    }

    async fn stores_for_brand(&self, brand_id: Uuid) -> anyhow::Result<Vec<Store>> {
        let rows = sqlx::query_as::<_, StoreRow>(
            "SELECT id, brand_id, name, segment FROM stores WHERE brand_id = $1 ORDER BY id",
        )
        .bind(brand_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Store::from).collect())
    }

    async fn templates_for_brand(&self, brand_id: Uuid) -> anyhow::Result<TemplateArena> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r"
            SELECT id, brand_id, version, supersedes, title, category, severity,
                   rotation_priority, include_in_rotation, active, source_kind, sentiment
            FROM check_templates
            WHERE brand_id = $1
            ORDER BY created_at, version
            ",
        )
        .bind(brand_id)
        .fetch_all(&self.pool)
        .await?;

        let templates = rows
            .into_iter()
            .map(Template::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        debug!(brand = %brand_id, templates = templates.len(), "Loaded template records");
        Ok(TemplateArena::from_records(templates))
    }

    async fn store_history(
        &self,
        store: &Store,
        since: DateTime<Utc>,
    ) -> anyhow::Result<StoreHistory> {
        let coverage = sqlx::query_as::<_, CheckCoverage>(
            r"
            SELECT store_id, template_id, last_verified_at, last_status,
                   consecutive_passes, consecutive_fails
            FROM check_coverage
            WHERE store_id = $1
            ",
        )
        .bind(store.id)
        .fetch_all(&self.pool)
        .await?;

        let responses = sqlx::query_as::<_, ResponseRecord>(
            r"
            SELECT r.store_id, r.template_id, t.category, r.status, r.answered_at
            FROM check_responses r
            JOIN check_templates t ON t.id = r.template_id
            WHERE r.store_id = $1 AND r.answered_at >= $2
            ORDER BY r.answered_at
            ",
        )
        .bind(store.id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let runs = sqlx::query_as::<_, RunRecord>(
            r"
            SELECT store_id, created_at, completed_at IS NOT NULL AS completed
            FROM check_runs
            WHERE store_id = $1 AND created_at >= $2
            ORDER BY created_at
            ",
        )
        .bind(store.id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            store = %store.id,
            coverage = coverage.len(),
            responses = responses.len(),
            runs = runs.len(),
            "Loaded store history"
        );
        Ok(StoreHistory::new(store.clone(), coverage, responses, runs))
    }

    async fn prior_stats(&self, store_id: Uuid) -> anyhow::Result<Vec<LocalPriorStats>> {
        let stats = sqlx::query_as::<_, LocalPriorStats>(
            r"
            SELECT store_id, template_id, fail_count, total_count
            FROM local_prior_stats
            WHERE store_id = $1
            ",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(stats)
    }
}
