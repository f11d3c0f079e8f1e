//! Offline training of failure models per scope.
//!
//! For each scope the pipeline reconstructs one labeled sample per historical
//! response (features as of the response time), splits them, trains the
//! logistic model, evaluates it on the held-out split and publishes it.

use std::collections::BTreeSet;
use std::sync::Arc;

use check_structs::{HistorySource, ModelScope, Segment};
use chrono::Utc;
use config::{PublishPolicy, ScopeMode, TrainingSettings};
use feature_extractor::{FeatureExtractor, TrainingSample};
use ml_model::{EvaluationMetrics, TrainingConfig, TrainingData, evaluate, fit_predictor, stratified_split};
use model_registry::{ModelMetadata, ModelRegistry};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How training a scope ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrainingOutcome {
    /// A new version was saved and is now "latest".
    Published { version: String },
    /// Trained and evaluated, nothing written.
    DryRun,
    /// Not enough labeled samples. The registry was not touched.
    InsufficientData { samples: usize, required: usize },
    /// Held back by the quality gate.
    Rejected { reason: String },
    /// Training raised an error.
    Failed { error: String },
}

/// Report for one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingResult {
    pub scope: ModelScope,
    pub outcome: TrainingOutcome,
    pub sample_count: usize,
    pub metrics: Option<EvaluationMetrics>,
    pub passed_quality_gate: Option<bool>,
}

impl TrainingResult {
    fn without_model(scope: ModelScope, sample_count: usize, outcome: TrainingOutcome) -> Self {
        Self {
            scope,
            outcome,
            sample_count,
            metrics: None,
            passed_quality_gate: None,
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self.outcome, TrainingOutcome::Failed { .. })
    }
}

/// Trains and publishes failure models.
pub struct TrainingPipeline {
    history: Arc<dyn HistorySource>,
    registry: Arc<ModelRegistry>,
    extractor: FeatureExtractor,
    settings: TrainingSettings,
}

impl TrainingPipeline {
    #[must_use]
    pub fn new(
        history: Arc<dyn HistorySource>,
        registry: Arc<ModelRegistry>,
        extractor: FeatureExtractor,
        settings: TrainingSettings,
    ) -> Self {
        Self {
            history,
            registry,
            extractor,
            settings,
        }
    }

    /// Trains one scope.
    ///
    /// Insufficient data and quality-gate rejections are reported in the
    /// result, not raised.
    ///
    /// # Errors
    ///
    /// Returns an error if history cannot be read, training fails, or the
    /// registry write fails.
    pub async fn train(
        &self,
        brand_id: Uuid,
        segment: Option<Segment>,
        dry_run: bool,
    ) -> anyhow::Result<TrainingResult> {
        let scope = ModelScope { brand_id, segment };
        info!(scope = %scope, dry_run, "Training scope");

        let data = self.collect_samples(&scope).await?;
        let sample_count = data.len();
        let required = self.settings.min_samples;

        if sample_count < required {
            warn!(scope = %scope, samples = sample_count, required, "Insufficient training data");
            return Ok(TrainingResult::without_model(
                scope,
                sample_count,
                TrainingOutcome::InsufficientData {
                    samples: sample_count,
                    required,
                },
            ));
        }

        let (train_set, test_set) =
            stratified_split(&data.samples, self.settings.test_fraction, self.settings.seed);
        if !has_both_classes(&train_set) || test_set.is_empty() {
            warn!(
                scope = %scope,
                samples = sample_count,
                positives = data.positives(),
                "Training split lacks one of the classes"
            );
            return Ok(TrainingResult::without_model(
                scope,
                sample_count,
                TrainingOutcome::InsufficientData {
                    samples: sample_count,
                    required,
                },
            ));
        }

        info!(
            scope = %scope,
            train = train_set.len(),
            test = test_set.len(),
            positives = data.positives(),
            "Fitting failure model"
        );

        let config = TrainingConfig {
            learning_rate: self.settings.learning_rate,
            epochs: self.settings.epochs,
            batch_size: self.settings.batch_size,
            seed: self.settings.seed,
        };
        let train_for_fit = train_set.clone();
        let (predictor, output) =
            tokio::task::spawn_blocking(move || fit_predictor(&train_for_fit, &config)).await??;

        let metrics = evaluate(&predictor, &test_set);
        let passed = metrics.meets(
            self.settings.min_precision,
            self.settings.min_recall,
            self.settings.min_f1,
        );
        info!(
            scope = %scope,
            precision = metrics.precision,
            recall = metrics.recall,
            f1 = metrics.f1,
            accuracy = metrics.accuracy,
            loss = output.final_train_loss,
            "Evaluated failure model"
        );
        if !passed {
            warn!(
                scope = %scope,
                min_precision = self.settings.min_precision,
                min_recall = self.settings.min_recall,
                min_f1 = self.settings.min_f1,
                "Model is below the quality thresholds"
            );
        }

        let result = |outcome| TrainingResult {
            scope,
            outcome,
            sample_count,
            metrics: Some(metrics),
            passed_quality_gate: Some(passed),
        };

        if dry_run {
            return Ok(result(TrainingOutcome::DryRun));
        }

        if !passed && self.settings.publish_policy == PublishPolicy::BlockBelowThreshold {
            return Ok(result(TrainingOutcome::Rejected {
                reason: format!(
                    "precision {:.3}, recall {:.3}, f1 {:.3} below thresholds",
                    metrics.precision, metrics.recall, metrics.f1
                ),
            }));
        }

        let mut metadata = ModelMetadata::new(scope, Utc::now());
        metadata.sample_count = sample_count;
        metadata.train_count = train_set.len();
        metadata.test_count = test_set.len();
        metadata.metrics = metrics;
        metadata.final_train_loss = output.final_train_loss;
        metadata.passed_quality_gate = passed;

        let saved = self.registry.save(&predictor, &scope, metadata).await?;
        Ok(result(TrainingOutcome::Published {
            version: saved.version,
        }))
    }

    /// Trains every scope of every brand. A failing scope is reported and
    /// does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns an error only if the brand list cannot be read.
    pub async fn train_all(&self, dry_run: bool) -> anyhow::Result<Vec<TrainingResult>> {
        let brands = self.history.brands().await?;
        info!(brands = brands.len(), mode = ?self.settings.scope_mode, "Starting bulk training");

        let mut results = Vec::new();
        for brand_id in brands {
            let scopes = match self.scopes_for_brand(brand_id).await {
                Ok(scopes) => scopes,
                Err(e) => {
                    error!(brand = %brand_id, error = %e, "Failed to resolve training scopes");
                    results.push(TrainingResult::without_model(
                        ModelScope::brand(brand_id),
                        0,
                        TrainingOutcome::Failed {
                            error: format!("{e:#}"),
                        },
                    ));
                    continue;
                }
            };

            for scope in scopes {
                let result = match self.train(scope.brand_id, scope.segment, dry_run).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(scope = %scope, error = %e, "Training failed");
                        TrainingResult::without_model(
                            scope,
                            0,
                            TrainingOutcome::Failed {
                                error: format!("{e:#}"),
                            },
                        )
                    }
                };
                results.push(result);
            }
        }

        let failed = results.iter().filter(|r| r.is_failure()).count();
        info!(scopes = results.len(), failed, "Bulk training finished");
        Ok(results)
    }

    /// Brand scope, or one scope per segment in use when training per segment.
    /// Stores without a segment keep a brand-wide scope.
    async fn scopes_for_brand(&self, brand_id: Uuid) -> anyhow::Result<Vec<ModelScope>> {
        if self.settings.scope_mode == ScopeMode::PerBrand {
            return Ok(vec![ModelScope::brand(brand_id)]);
        }

        let stores = self.history.stores_for_brand(brand_id).await?;
        let segments: BTreeSet<Segment> = stores.iter().filter_map(|s| s.segment).collect();
        let mut scopes: Vec<ModelScope> = segments
            .into_iter()
            .map(|segment| ModelScope::segmented(brand_id, segment))
            .collect();
        if scopes.is_empty() || stores.iter().any(|s| s.segment.is_none()) {
            scopes.push(ModelScope::brand(brand_id));
        }
        Ok(scopes)
    }

    /// Labeled samples for every store in scope within the lookback period.
    async fn collect_samples(&self, scope: &ModelScope) -> anyhow::Result<TrainingData> {
        let since = Utc::now() - chrono::Duration::days(self.settings.lookback_days);
        // Features at the earliest sample need one window of earlier history.
        let history_since = since - self.extractor.window();

        let templates = self.history.templates_for_brand(scope.brand_id).await?;
        let stores = self.history.stores_for_brand(scope.brand_id).await?;

        let mut data = TrainingData::new();
        for store in stores
            .iter()
            .filter(|s| scope.segment.is_none() || s.segment == scope.segment)
        {
            let history = self.history.store_history(store, history_since).await?;
            data.add_samples(
                self.extractor
                    .extract_training_samples(&history, &templates, since),
            );
        }
        Ok(data)
    }
}

fn has_both_classes(samples: &[TrainingSample]) -> bool {
    samples.iter().any(|s| s.failed) && samples.iter().any(|s| !s.failed)
}

#[cfg(test)]
mod tests {
    use check_structs::{CheckStatus, Severity, Store, Template};
    use chrono::{DateTime, Duration};

    use super::*;
    use crate::fixtures::{InMemoryHistory, test_registry, unavailable_registry};

    fn settings(min_samples: usize) -> TrainingSettings {
        TrainingSettings {
            min_samples,
            epochs: 15,
            batch_size: 32,
            ..TrainingSettings::default()
        }
    }

    /// Daily responses over `days` days for three templates. The critical
    /// food-safety check fails after every failure-free streak of two days.
    fn seed_history(
        history: &mut InMemoryHistory,
        store: &Store,
        templates: &[Template],
        days: i64,
        end: DateTime<Utc>,
    ) {
        for day in (1..=days).rev() {
            let at = end - Duration::days(day);
            history.run(store, at, day % 5 != 0);
            for (i, template) in templates.iter().enumerate() {
                let failing = match i {
                    0 => day % 3 == 0,
                    1 => day % 11 == 0,
                    _ => false,
                };
                let status = if failing {
                    CheckStatus::Fail
                } else {
                    CheckStatus::Pass
                };
                history.respond(store, template, status, at + Duration::minutes(i as i64));
            }
        }
    }

    fn brand_fixture(history: &mut InMemoryHistory, days: i64) -> Uuid {
        let brand = Uuid::new_v4();
        let store = history.add_store(brand, None);
        let templates = vec![
            history.add_template(brand, "food_safety", Severity::Critical),
            history.add_template(brand, "cleanliness", Severity::Medium),
            history.add_template(brand, "signage", Severity::Low),
        ];
        seed_history(history, &store, &templates, days, Utc::now());
        brand
    }

    #[tokio::test]
    async fn test_train_publishes_model() {
        let mut history = InMemoryHistory::default();
        let brand = brand_fixture(&mut history, 60);
        let (registry, _remote, _dir) = test_registry();
        let pipeline = TrainingPipeline::new(
            Arc::new(history),
            Arc::clone(&registry),
            FeatureExtractor::default(),
            settings(50),
        );

        let result = pipeline.train(brand, None, false).await.unwrap();
        assert_eq!(result.sample_count, 180);
        let TrainingOutcome::Published { version } = &result.outcome else {
            panic!("expected a published model, got {:?}", result.outcome);
        };
        assert!(result.metrics.is_some());

        let scope = ModelScope::brand(brand);
        registry.clear_local();
        let loaded = registry.load(&scope).await.unwrap();
        assert_eq!(&loaded.metadata.version, version);
        assert_eq!(loaded.metadata.sample_count, 180);
        assert_eq!(
            loaded.metadata.train_count + loaded.metadata.test_count,
            180
        );
    }

    #[tokio::test]
    async fn test_dry_run_does_not_publish() {
        let mut history = InMemoryHistory::default();
        let brand = brand_fixture(&mut history, 60);
        let (registry, _remote, _dir) = test_registry();
        let pipeline = TrainingPipeline::new(
            Arc::new(history),
            Arc::clone(&registry),
            FeatureExtractor::default(),
            settings(50),
        );

        let result = pipeline.train(brand, None, true).await.unwrap();
        assert_eq!(result.outcome, TrainingOutcome::DryRun);
        assert!(registry.load(&ModelScope::brand(brand)).await.is_none());
    }

    #[tokio::test]
    async fn test_insufficient_data_leaves_latest_untouched() {
        let mut history = InMemoryHistory::default();
        let brand = Uuid::new_v4();
        let store = history.add_store(brand, None);
        let template = history.add_template(brand, "food_safety", Severity::High);
        let now = Utc::now();
        for day in 1..=5 {
            history.respond(&store, &template, CheckStatus::Pass, now - Duration::days(day));
        }

        let (registry, _remote, _dir) = test_registry();
        let scope = ModelScope::brand(brand);
        let existing = registry
            .save(
                &ml_model::FailurePredictor {
                    weights: [0.0; feature_extractor::FEATURE_COUNT],
                    bias: 0.0,
                    standardizer: ml_model::Standardizer::default(),
                },
                &scope,
                ModelMetadata::new(scope, now),
            )
            .await
            .unwrap();

        let pipeline = TrainingPipeline::new(
            Arc::new(history),
            Arc::clone(&registry),
            FeatureExtractor::default(),
            settings(100),
        );
        let result = pipeline.train(brand, None, false).await.unwrap();
        assert_eq!(
            result.outcome,
            TrainingOutcome::InsufficientData {
                samples: 5,
                required: 100
            }
        );

        registry.clear_local();
        assert_eq!(
            registry.load(&scope).await.unwrap().metadata.version,
            existing.version
        );
        assert_eq!(registry.list_versions(&scope).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_class_is_insufficient() {
        let mut history = InMemoryHistory::default();
        let brand = Uuid::new_v4();
        let store = history.add_store(brand, None);
        let template = history.add_template(brand, "signage", Severity::Low);
        let now = Utc::now();
        for day in 1..=30 {
            history.respond(&store, &template, CheckStatus::Pass, now - Duration::days(day));
        }

        let (registry, _remote, _dir) = test_registry();
        let pipeline = TrainingPipeline::new(
            Arc::new(history),
            registry,
            FeatureExtractor::default(),
            settings(10),
        );
        let result = pipeline.train(brand, None, false).await.unwrap();
        assert!(matches!(
            result.outcome,
            TrainingOutcome::InsufficientData { samples: 30, .. }
        ));
    }

    #[tokio::test]
    async fn test_blocking_policy_rejects_weak_model() {
        let mut history = InMemoryHistory::default();
        let brand = brand_fixture(&mut history, 60);
        let (registry, _remote, _dir) = test_registry();
        let pipeline = TrainingPipeline::new(
            Arc::new(history),
            Arc::clone(&registry),
            FeatureExtractor::default(),
            TrainingSettings {
                publish_policy: PublishPolicy::BlockBelowThreshold,
                min_precision: 1.1,
                ..settings(50)
            },
        );

        let result = pipeline.train(brand, None, false).await.unwrap();
        assert!(matches!(result.outcome, TrainingOutcome::Rejected { .. }));
        assert_eq!(result.passed_quality_gate, Some(false));
        assert!(registry.load(&ModelScope::brand(brand)).await.is_none());
    }

    #[tokio::test]
    async fn test_publish_anyway_below_threshold() {
        let mut history = InMemoryHistory::default();
        let brand = brand_fixture(&mut history, 60);
        let (registry, _remote, _dir) = test_registry();
        let pipeline = TrainingPipeline::new(
            Arc::new(history),
            Arc::clone(&registry),
            FeatureExtractor::default(),
            TrainingSettings {
                min_precision: 1.1,
                ..settings(50)
            },
        );

        let result = pipeline.train(brand, None, false).await.unwrap();
        assert!(matches!(result.outcome, TrainingOutcome::Published { .. }));
        let loaded = registry.load(&ModelScope::brand(brand)).await.unwrap();
        assert!(!loaded.metadata.passed_quality_gate);
    }

    #[tokio::test]
    async fn test_train_all_isolates_failures() {
        let mut history = InMemoryHistory::default();
        let healthy = brand_fixture(&mut history, 60);
        let broken = brand_fixture(&mut history, 60);
        history.failing_brands.insert(broken);

        let (registry, _remote, _dir) = test_registry();
        let pipeline = TrainingPipeline::new(
            Arc::new(history),
            registry,
            FeatureExtractor::default(),
            settings(50),
        );

        let results = pipeline.train_all(false).await.unwrap();
        assert_eq!(results.len(), 2);

        let by_brand = |brand: Uuid| results.iter().find(|r| r.scope.brand_id == brand).unwrap();
        assert!(matches!(
            by_brand(healthy).outcome,
            TrainingOutcome::Published { .. }
        ));
        assert!(by_brand(broken).is_failure());
    }

    #[tokio::test]
    async fn test_per_segment_scopes() {
        let mut history = InMemoryHistory::default();
        let brand = Uuid::new_v4();
        history.add_store(brand, Some(Segment::High));
        history.add_store(brand, Some(Segment::Low));
        history.add_store(brand, Some(Segment::High));

        let (registry, _remote, _dir) = test_registry();
        let pipeline = TrainingPipeline::new(
            Arc::new(history),
            registry,
            FeatureExtractor::default(),
            TrainingSettings {
                scope_mode: ScopeMode::PerSegment,
                ..settings(50)
            },
        );

        let scopes = pipeline.scopes_for_brand(brand).await.unwrap();
        assert_eq!(
            scopes,
            vec![
                ModelScope::segmented(brand, Segment::Low),
                ModelScope::segmented(brand, Segment::High),
            ]
        );

        let results = pipeline.train_all(true).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(
            r.outcome,
            TrainingOutcome::InsufficientData { samples: 0, .. }
        )));
    }

    #[tokio::test]
    async fn test_unreachable_remote_fails_scope_loudly() {
        let mut history = InMemoryHistory::default();
        let brand = brand_fixture(&mut history, 60);
        let (registry, _dir) = unavailable_registry();
        let pipeline = TrainingPipeline::new(
            Arc::new(history),
            registry,
            FeatureExtractor::default(),
            settings(50),
        );

        assert!(pipeline.train(brand, None, false).await.is_err());

        let results = pipeline.train_all(false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].scope, ModelScope::brand(brand));
        let TrainingOutcome::Failed { error } = &results[0].outcome else {
            panic!("expected a failed scope, got {:?}", results[0].outcome);
        };
        assert!(error.contains("connection refused"), "{error}");
    }
}
