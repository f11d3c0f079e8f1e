//! Daily check selection.
//!
//! Every eligible template gets a rule score from its coverage and severity.
//! When a failure model is published for the store's scope, the rule score is
//! mixed with the model's failure probability blended against the store's own
//! prior. Templates are then drawn by weighted sampling without replacement
//! and each pick gets a photo-evidence decision.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use check_structs::{CoverageView, HistorySource, ModelScope, Severity, Store, Template};
use chrono::{DateTime, Duration, Utc};
use config::{ScopeMode, SelectorConfig};
use feature_extractor::{FeatureExtractor, FeatureVector};
use ml_model::{LocalPrior, blend};
use model_registry::{ModelRegistry, RegisteredModel};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The days term of the rule score stops growing after this many days.
/// Never-checked pairs hit the cap through the extractor's sentinel.
const DAYS_TERM_CAP: f64 = 100.0;

/// Why a selected check needs photo evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhotoReason {
    FirstCheck,
    CriticalCategory,
    PriorFail,
    RandomAudit,
    None,
}

/// One template chosen for a check run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedCheck {
    pub template_id: Uuid,
    pub photo_required: bool,
    pub reason: PhotoReason,
    /// Final score in `(0, 1]`, relative to the candidate pool.
    pub score: f64,
}

/// Rule score of a pair: staleness, previous failure and severity.
///
/// `100 + 2 * days + 30 * failed_last_time + severity bonus`, floored at 1.
#[must_use]
pub fn rule_score(features: &FeatureVector, severity: Severity) -> f64 {
    let days = f64::from(features.days_since_last_checked()).clamp(0.0, DAYS_TERM_CAP);
    let failed = if features.failed_last_time() { 30.0 } else { 0.0 };
    (100.0 + 2.0 * days + failed + severity.rule_bonus()).max(1.0)
}

/// Multiplier applied to sampling weights from the authored rotation priority.
#[must_use]
pub fn rotation_factor(priority: u8) -> f64 {
    0.5 + f64::from(priority.min(100)) / 100.0
}

/// A scored candidate before sampling.
#[derive(Debug, Clone)]
struct Scored<'a> {
    template: &'a Template,
    coverage: Option<CoverageView>,
    rule: f64,
    probability: Option<f64>,
    score: f64,
}

/// Picks checks for a store's run.
pub struct Selector {
    history: Arc<dyn HistorySource>,
    registry: Arc<ModelRegistry>,
    extractor: FeatureExtractor,
    prior: LocalPrior,
    config: SelectorConfig,
    scope_mode: ScopeMode,
}

impl Selector {
    #[must_use]
    pub fn new(
        history: Arc<dyn HistorySource>,
        registry: Arc<ModelRegistry>,
        prior: LocalPrior,
        config: SelectorConfig,
        scope_mode: ScopeMode,
    ) -> Self {
        Self {
            history,
            registry,
            extractor: FeatureExtractor::new(config.history_window_days),
            prior,
            config,
            scope_mode,
        }
    }

    /// Selects up to `count` distinct templates from `candidates` for `store`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store's history cannot be read. Model
    /// availability never fails a selection.
    pub async fn select(
        &self,
        store: &Store,
        candidates: &[Template],
        count: usize,
    ) -> anyhow::Result<Vec<SelectedCheck>> {
        let mut rng = StdRng::from_entropy();
        self.select_with_rng(store, candidates, count, Utc::now(), &mut rng)
            .await
    }

    /// Selection at an explicit instant with a caller-provided random source.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store's history cannot be read.
    pub async fn select_with_rng<R: Rng + Send>(
        &self,
        store: &Store,
        candidates: &[Template],
        count: usize,
        as_of: DateTime<Utc>,
        rng: &mut R,
    ) -> anyhow::Result<Vec<SelectedCheck>> {
        let eligible = eligible_candidates(store, candidates);
        if eligible.is_empty() || count == 0 {
            debug!(store = %store.id, candidates = candidates.len(), "No eligible templates");
            return Ok(Vec::new());
        }

        let since = as_of - self.extractor.window() - Duration::days(1);
        let history = self.history.store_history(store, since).await?;
        let model = self.resolve_model(store).await;

        let stats: HashMap<Uuid, _> = if model.is_some() {
            match self.history.prior_stats(store.id).await {
                Ok(rows) => rows.into_iter().map(|s| (s.template_id, s)).collect(),
                Err(e) => {
                    warn!(store = %store.id, error = %e, "Failed to read local prior stats, using unconditional prior");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        let mut pool: Vec<Scored<'_>> = eligible
            .into_iter()
            .map(|template| {
                let features = self.extractor.extract(&history, template, as_of);
                let probability = model.as_ref().map(|model| {
                    let p_model = model.predictor.predict_probability(&features);
                    let local = self.prior.estimate(stats.get(&template.id));
                    blend(local, p_model, self.config.cold_start_k)
                });
                Scored {
                    template,
                    coverage: history.coverage_as_of(template.id, as_of),
                    rule: rule_score(&features, template.severity),
                    probability,
                    score: 0.0,
                }
            })
            .collect();

        self.normalize(&mut pool);

        let picked = sample_without_replacement(&pool, count, rng);
        let mut selected: Vec<SelectedCheck> = picked
            .into_iter()
            .map(|scored| {
                let reason = self.photo_reason(scored, rng);
                SelectedCheck {
                    template_id: scored.template.id,
                    photo_required: reason != PhotoReason::None,
                    reason,
                    score: scored.score,
                }
            })
            .collect();

        selected.sort_by(|a, b| b.score.total_cmp(&a.score));

        info!(
            store = %store.id,
            pool = pool.len(),
            selected = selected.len(),
            model = model.as_ref().map_or("none", |m| m.metadata.version.as_str()),
            "Checks selected"
        );
        Ok(selected)
    }

    /// First published model among the store's candidate scopes.
    async fn resolve_model(&self, store: &Store) -> Option<Arc<RegisteredModel>> {
        let per_segment = self.scope_mode == ScopeMode::PerSegment;
        for scope in ModelScope::candidates_for(store, per_segment) {
            if let Some(model) = self.registry.load(&scope).await {
                debug!(store = %store.id, scope = %scope, "Using failure model");
                return Some(model);
            }
        }
        debug!(store = %store.id, "No failure model, using rule scores only");
        None
    }

    /// Normalizes rule scores and probabilities by the pool maximum and mixes them.
    fn normalize(&self, pool: &mut [Scored<'_>]) {
        let max_rule = pool.iter().map(|s| s.rule).fold(f64::MIN_POSITIVE, f64::max);
        let max_probability = pool
            .iter()
            .filter_map(|s| s.probability)
            .fold(0.0, f64::max);

        for scored in pool.iter_mut() {
            let rule = scored.rule / max_rule;
            scored.score = match scored.probability {
                Some(p) => {
                    let p = if max_probability > 0.0 { p / max_probability } else { 0.0 };
                    self.config.rule_weight.mul_add(rule, self.config.ml_weight * p)
                }
                None => rule,
            };
        }
    }

    fn photo_reason<R: Rng>(&self, scored: &Scored<'_>, rng: &mut R) -> PhotoReason {
        match scored.coverage {
            None => PhotoReason::FirstCheck,
            Some(view) if view.last_status.is_failure() => PhotoReason::PriorFail,
            Some(_) if self.config.critical_requires_photo
                && scored.template.severity == Severity::Critical =>
            {
                PhotoReason::CriticalCategory
            }
            Some(_) if rng.gen_bool(self.config.audit_probability.clamp(0.0, 1.0)) => {
                PhotoReason::RandomAudit
            }
            Some(_) => PhotoReason::None,
        }
    }
}

/// Active, rotation-included templates of the store's brand that no other
/// candidate supersedes. Duplicate ids are dropped.
fn eligible_candidates<'a>(store: &Store, candidates: &'a [Template]) -> Vec<&'a Template> {
    let superseded: HashSet<Uuid> = candidates.iter().filter_map(|t| t.supersedes).collect();
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|t| t.is_rotation_eligible())
        .filter(|t| t.brand_id == store.brand_id)
        .filter(|t| !superseded.contains(&t.id))
        .filter(|t| seen.insert(t.id))
        .collect()
}

/// Weighted draw of `count` distinct candidates, weight = score × rotation factor.
fn sample_without_replacement<'p, 'a, R: Rng>(
    pool: &'p [Scored<'a>],
    count: usize,
    rng: &mut R,
) -> Vec<&'p Scored<'a>> {
    let amount = count.min(pool.len());
    match pool.choose_multiple_weighted(rng, amount, |s| {
        s.score * rotation_factor(s.template.rotation_priority)
    }) {
        Ok(picked) => picked.collect(),
        Err(e) => {
            warn!(error = %e, "Weighted sampling failed, taking the top scores");
            let mut ranked: Vec<&Scored<'a>> = pool.iter().collect();
            ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
            ranked.truncate(amount);
            ranked
        }
    }
}
