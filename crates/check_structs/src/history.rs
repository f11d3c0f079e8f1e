//! Response and run history for a store, plus the seam to the persistence layer.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CheckCoverage, CheckStatus, LocalPriorStats, Store, TemplateArena};

/// A single answered check item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ResponseRecord {
    pub store_id: Uuid,
    pub template_id: Uuid,
    pub category: String,
    pub status: CheckStatus,
    pub answered_at: DateTime<Utc>,
}

/// A check run delivered to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunRecord {
    pub store_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub completed: bool,
}

/// Coverage of a pair as it stood at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageView {
    pub last_verified_at: DateTime<Utc>,
    pub last_status: CheckStatus,
}

/// Snapshot of everything known about one store's check history.
///
/// Responses and runs are kept sorted by time so windowed lookups are
/// binary searches.
#[derive(Debug, Clone)]
pub struct StoreHistory {
    pub store: Store,
    coverage: HashMap<Uuid, CheckCoverage>,
    responses: Vec<ResponseRecord>,
    runs: Vec<RunRecord>,
}

impl StoreHistory {
    #[must_use]
    pub fn new(
        store: Store,
        coverage: Vec<CheckCoverage>,
        mut responses: Vec<ResponseRecord>,
        mut runs: Vec<RunRecord>,
    ) -> Self {
        responses.sort_by_key(|r| r.answered_at);
        runs.sort_by_key(|r| r.created_at);
        Self {
            store,
            coverage: coverage.into_iter().map(|c| (c.template_id, c)).collect(),
            responses,
            runs,
        }
    }

    /// An empty history, as for a brand-new store.
    #[must_use]
    pub fn empty(store: Store) -> Self {
        Self::new(store, Vec::new(), Vec::new(), Vec::new())
    }

    #[must_use]
    pub fn responses(&self) -> &[ResponseRecord] {
        &self.responses
    }

    #[must_use]
    pub fn coverage_row(&self, template_id: Uuid) -> Option<&CheckCoverage> {
        self.coverage.get(&template_id)
    }

    /// Coverage of `template_id` strictly before `as_of`.
    ///
    /// The stored row is authoritative when it predates `as_of`; otherwise the
    /// view is rebuilt from the latest earlier response, which is what lets
    /// training reconstruct features at historical instants.
    #[must_use]
    pub fn coverage_as_of(&self, template_id: Uuid, as_of: DateTime<Utc>) -> Option<CoverageView> {
        if let Some(row) = self.coverage.get(&template_id)
            && row.last_verified_at < as_of
        {
            return Some(CoverageView {
                last_verified_at: row.last_verified_at,
                last_status: row.last_status,
            });
        }

        let end = self.responses.partition_point(|r| r.answered_at < as_of);
        self.responses[..end]
            .iter()
            .rev()
            .find(|r| r.template_id == template_id)
            .map(|r| CoverageView {
                last_verified_at: r.answered_at,
                last_status: r.status,
            })
    }

    /// `(failures, total)` responses in `category` within `[from, to)`.
    #[must_use]
    pub fn category_counts(
        &self,
        category: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> (usize, usize) {
        let start = self.responses.partition_point(|r| r.answered_at < from);
        let end = self.responses.partition_point(|r| r.answered_at < to);
        if start >= end {
            return (0, 0);
        }
        self.responses[start..end]
            .iter()
            .filter(|r| r.category == category)
            .fold((0, 0), |(fails, total), r| {
                (fails + usize::from(r.status.is_failure()), total + 1)
            })
    }

    /// `(completed, total)` runs created within `[from, to)`.
    #[must_use]
    pub fn run_counts(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> (usize, usize) {
        let start = self.runs.partition_point(|r| r.created_at < from);
        let end = self.runs.partition_point(|r| r.created_at < to);
        if start >= end {
            return (0, 0);
        }
        let window = &self.runs[start..end];
        (window.iter().filter(|r| r.completed).count(), window.len())
    }
}

/// Read access to the check history owned by the CRUD layer's database.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// All brands that have at least one store.
    async fn brands(&self) -> anyhow::Result<Vec<Uuid>>;

    async fn store(&self, store_id: Uuid) -> anyhow::Result<Option<Store>>;

    async fn stores_for_brand(&self, brand_id: Uuid) -> anyhow::Result<Vec<Store>>;

    /// Every template version authored for the brand.
    async fn templates_for_brand(&self, brand_id: Uuid) -> anyhow::Result<TemplateArena>;

    /// Coverage rows plus responses and runs at or after `since`.
    async fn store_history(
        &self,
        store: &Store,
        since: DateTime<Utc>,
    ) -> anyhow::Result<StoreHistory>;

    async fn prior_stats(&self, store_id: Uuid) -> anyhow::Result<Vec<LocalPriorStats>>;
}
