//! Beta-smoothed local failure priors and cold-start blending.

use check_structs::LocalPriorStats;
use serde::{Deserialize, Serialize};

/// Local failure probability for one (store, template) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorEstimate {
    /// Smoothed failure probability.
    pub probability: f64,
    /// Number of observed responses behind the estimate.
    pub total: u64,
}

/// Beta(alpha, beta) smoothing of observed fail counts.
///
/// The pseudo-counts are shared process-wide configuration; the defaults
/// (1, 3) lean toward passing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPrior {
    alpha: f64,
    beta: f64,
}

impl Default for LocalPrior {
    fn default() -> Self {
        Self::new(1.0, 3.0)
    }
}

impl LocalPrior {
    #[must_use]
    pub const fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// `(fails + alpha) / (total + alpha + beta)`.
    #[must_use]
    pub fn prior(&self, fails: u64, total: u64) -> f64 {
        (fails as f64 + self.alpha) / (total as f64 + self.alpha + self.beta)
    }

    /// Probability used when a pair has never been observed.
    #[must_use]
    pub fn unconditional(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Estimate for a pair, falling back to the unconditional prior when no
    /// stats row exists.
    #[must_use]
    pub fn estimate(&self, stats: Option<&LocalPriorStats>) -> PriorEstimate {
        match stats {
            Some(stats) => {
                let total = stats.total_count.max(0) as u64;
                let fails = (stats.fail_count.max(0) as u64).min(total);
                PriorEstimate {
                    probability: self.prior(fails, total),
                    total,
                }
            }
            None => PriorEstimate {
                probability: self.unconditional(),
                total: 0,
            },
        }
    }
}

/// Weight of the local prior: `total / (total + k)`.
#[must_use]
pub fn cold_start_weight(total: u64, k: f64) -> f64 {
    let total = total as f64;
    total / (total + k)
}

/// Blends the local prior with the brand model by local sample size.
///
/// Little local history leans on the model; rich history leans on the
/// store's own empirical prior.
#[must_use]
pub fn blend(local: PriorEstimate, model_probability: f64, k: f64) -> f64 {
    let lambda = cold_start_weight(local.total, k);
    lambda.mul_add(local.probability, (1.0 - lambda) * model_probability)
}
