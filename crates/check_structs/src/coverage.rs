use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a single check response, matching the `PostgreSQL` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "check_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    NeedsAttention,
}

impl CheckStatus {
    /// FAIL and NEEDS_ATTENTION both count as failures for labels and rates.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::NeedsAttention)
    }
}

/// When and how a (store, template) pair was last verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CheckCoverage {
    pub store_id: Uuid,
    pub template_id: Uuid,
    pub last_verified_at: DateTime<Utc>,
    pub last_status: CheckStatus,
    pub consecutive_passes: i32,
    pub consecutive_fails: i32,
}

impl CheckCoverage {
    /// Creates the coverage row for a pair's first recorded response.
    #[must_use]
    pub fn first(store_id: Uuid, template_id: Uuid, status: CheckStatus, at: DateTime<Utc>) -> Self {
        let mut coverage = Self {
            store_id,
            template_id,
            last_verified_at: at,
            last_status: status,
            consecutive_passes: 0,
            consecutive_fails: 0,
        };
        coverage.bump_streaks(status);
        coverage
    }

    /// Folds a new response into the row. Older responses than the current
    /// `last_verified_at` are ignored so replays are idempotent.
    pub fn apply(&mut self, status: CheckStatus, at: DateTime<Utc>) {
        if at < self.last_verified_at {
            return;
        }
        self.last_verified_at = at;
        self.last_status = status;
        self.bump_streaks(status);
    }

    fn bump_streaks(&mut self, status: CheckStatus) {
        if status.is_failure() {
            self.consecutive_fails += 1;
            self.consecutive_passes = 0;
        } else {
            self.consecutive_passes += 1;
            self.consecutive_fails = 0;
        }
    }
}

/// Cumulative fail/total counts feeding the local prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocalPriorStats {
    pub store_id: Uuid,
    pub template_id: Uuid,
    pub fail_count: i64,
    pub total_count: i64,
}

impl LocalPriorStats {
    #[must_use]
    pub const fn empty(store_id: Uuid, template_id: Uuid) -> Self {
        Self {
            store_id,
            template_id,
            fail_count: 0,
            total_count: 0,
        }
    }

    /// Counts one more response. Both counters only ever grow.
    pub const fn record(&mut self, status: CheckStatus) {
        self.total_count += 1;
        if status.is_failure() {
            self.fail_count += 1;
        }
    }
}
