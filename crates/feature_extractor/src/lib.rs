//! Feature extractor crate for the check failure model.
//!
//! This crate turns a store's check history into fixed-width feature vectors
//! for a (store, template) pair at an explicit instant. Training and online
//! selection both go through [`FeatureExtractor::extract`], so a model never
//! sees features computed differently from the ones it was trained on.

use check_structs::{StoreHistory, Template, TemplateArena};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The number of features extracted per (store, template) pair.
/// This includes:
/// - Days since the pair was last checked (1)
/// - 14-day category fail rate at the store (1)
/// - Failed last time flag (1)
/// - 14-day store run completion rate (1)
/// - Severity ordinal (1)
/// - Template sentiment (1)
/// - One-hot store segment (3)
pub const FEATURE_COUNT: usize = 9;

/// Ordered feature names. The order is part of the model schema.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "days_since_last_checked",
    "category_fail_rate_14d",
    "failed_last_time",
    "store_completion_rate_14d",
    "severity_numeric",
    "sentiment_score",
    "segment_low",
    "segment_medium",
    "segment_high",
];

/// Sentinel for pairs that have never been checked.
pub const NEVER_CHECKED_DAYS: f32 = 999.0;

/// Index of each feature inside [`FeatureVector::features`].
pub mod index {
    pub const DAYS_SINCE_LAST_CHECKED: usize = 0;
    pub const CATEGORY_FAIL_RATE: usize = 1;
    pub const FAILED_LAST_TIME: usize = 2;
    pub const STORE_COMPLETION_RATE: usize = 3;
    pub const SEVERITY: usize = 4;
    pub const SENTIMENT: usize = 5;
    pub const SEGMENT_START: usize = 6;
}

/// Fingerprint of the feature schema: SHA-256 over the ordered names.
///
/// A model whose recorded fingerprint differs from this one was trained on a
/// different feature layout and must not be used for scoring.
#[must_use]
pub fn feature_schema_fingerprint() -> String {
    schema_fingerprint(&FEATURE_NAMES)
}

/// Fingerprint of an arbitrary ordered list of feature names.
#[must_use]
pub fn schema_fingerprint<S: AsRef<str>>(names: &[S]) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_ref().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Feature vector for one (store, template) pair at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// The raw feature vector.
    pub features: [f32; FEATURE_COUNT],
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            features: [0.0; FEATURE_COUNT],
        }
    }
}

impl FeatureVector {
    #[must_use]
    pub const fn days_since_last_checked(&self) -> f32 {
        self.features[index::DAYS_SINCE_LAST_CHECKED]
    }

    #[must_use]
    pub fn failed_last_time(&self) -> bool {
        self.features[index::FAILED_LAST_TIME] > 0.5
    }

    /// Little-endian byte encoding, used to compare vectors exactly.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.features.iter().flat_map(|f| f.to_le_bytes()).collect()
    }
}

/// Training sample combining features with the observed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: FeatureVector,
    /// `true` iff the response was FAIL or NEEDS_ATTENTION.
    pub failed: bool,
}

/// Computes feature vectors over a trailing history window.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    window: Duration,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(14)
    }
}

impl FeatureExtractor {
    /// Creates an extractor whose rate features look back `window_days`.
    #[must_use]
    pub fn new(window_days: i64) -> Self {
        Self {
            window: Duration::days(window_days),
        }
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Extracts the feature vector for `template` at `history.store` as of `as_of`.
    ///
    /// Only events strictly before `as_of` are visible, which makes the result
    /// a pure function of `(history, template, as_of)`.
    #[must_use]
    pub fn extract(
        &self,
        history: &StoreHistory,
        template: &Template,
        as_of: DateTime<Utc>,
    ) -> FeatureVector {
        let mut vector = FeatureVector::default();
        let window_start = as_of - self.window;

        let coverage = history.coverage_as_of(template.id, as_of);

        vector.features[index::DAYS_SINCE_LAST_CHECKED] =
            coverage.map_or(NEVER_CHECKED_DAYS, |c| days_between(c.last_verified_at, as_of));

        let (fails, total) = history.category_counts(&template.category, window_start, as_of);
        // No responses in the window is "no evidence of risk", not "unknown".
        vector.features[index::CATEGORY_FAIL_RATE] = ratio(fails, total, 0.0);

        vector.features[index::FAILED_LAST_TIME] =
            if coverage.is_some_and(|c| c.last_status.is_failure()) {
                1.0
            } else {
                0.0
            };

        let (completed, runs) = history.run_counts(window_start, as_of);
        // New stores are not penalized for having no runs yet.
        vector.features[index::STORE_COMPLETION_RATE] = ratio(completed, runs, 1.0);

        vector.features[index::SEVERITY] = template.severity.numeric();
        vector.features[index::SENTIMENT] = template.source.sentiment();

        if let Some(segment) = history.store.segment {
            vector.features[index::SEGMENT_START + segment.one_hot_index()] = 1.0;
        }

        vector
    }

    /// Reconstructs one labeled sample per historical response.
    ///
    /// Each sample's features are computed as of the response's own timestamp,
    /// so the response itself and anything after it are excluded. Responses
    /// whose template is not in `templates` are skipped.
    #[must_use]
    pub fn extract_training_samples(
        &self,
        history: &StoreHistory,
        templates: &TemplateArena,
        since: DateTime<Utc>,
    ) -> Vec<TrainingSample> {
        history
            .responses()
            .iter()
            .filter(|r| r.answered_at >= since)
            .filter_map(|response| {
                let template = templates.get(response.template_id)?;
                Some(TrainingSample {
                    features: self.extract(history, template, response.answered_at),
                    failed: response.status.is_failure(),
                })
            })
            .collect()
    }
}

// Helper functions

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f32 {
    let seconds = (to - from).num_seconds().max(0);
    (seconds as f64 / 86_400.0) as f32
}

fn ratio(numerator: usize, denominator: usize, empty: f32) -> f32 {
    if denominator == 0 {
        empty
    } else {
        (numerator as f64 / denominator as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use check_structs::{
        CheckCoverage, CheckStatus, ResponseRecord, RunRecord, Segment, Severity, Store,
        TemplateSource,
    };
    use uuid::Uuid;

    use super::*;

    fn store(segment: Option<Segment>) -> Store {
        Store {
            id: Uuid::new_v4(),
            brand_id: Uuid::new_v4(),
            name: "Harbor".to_string(),
            segment,
        }
    }

    fn response(
        store: &Store,
        template: &Template,
        status: CheckStatus,
        at: DateTime<Utc>,
    ) -> ResponseRecord {
        ResponseRecord {
            store_id: store.id,
            template_id: template.id,
            category: template.category.clone(),
            status,
            answered_at: at,
        }
    }

    #[test]
    fn test_feature_vector_default() {
        let vector = FeatureVector::default();
        assert_eq!(vector.features.len(), FEATURE_COUNT);
        assert!(vector.features.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_never_checked_store_defaults() {
        let store = store(Some(Segment::High));
        let template = Template::new(store.brand_id, "Fryer oil", "food_safety", Severity::Critical);
        let history = StoreHistory::empty(store);

        let vector = FeatureExtractor::default().extract(&history, &template, Utc::now());

        assert!((vector.days_since_last_checked() - NEVER_CHECKED_DAYS).abs() < f32::EPSILON);
        assert!(vector.features[index::CATEGORY_FAIL_RATE].abs() < f32::EPSILON);
        assert!(!vector.failed_last_time());
        assert!((vector.features[index::STORE_COMPLETION_RATE] - 1.0).abs() < f32::EPSILON);
        assert!((vector.features[index::SEVERITY] - 4.0).abs() < f32::EPSILON);
        assert_eq!(&vector.features[index::SEGMENT_START..], &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_rates_and_coverage() {
        let store = store(Some(Segment::Low));
        let mut template = Template::new(store.brand_id, "Hand sink", "hygiene", Severity::Medium);
        template.source = TemplateSource::CustomerFeedback {
            sentiment: Some(-0.5),
        };
        let other = Template::new(store.brand_id, "Mop sink", "hygiene", Severity::Low);
        let as_of = Utc::now();

        let responses = vec![
            response(&store, &other, CheckStatus::Fail, as_of - Duration::days(20)),
            response(&store, &other, CheckStatus::Fail, as_of - Duration::days(3)),
            response(&store, &other, CheckStatus::Pass, as_of - Duration::days(2)),
            response(&store, &template, CheckStatus::NeedsAttention, as_of - Duration::days(4)),
        ];
        let coverage = vec![CheckCoverage::first(
            store.id,
            template.id,
            CheckStatus::NeedsAttention,
            as_of - Duration::days(4),
        )];
        let runs = vec![
            RunRecord {
                store_id: store.id,
                created_at: as_of - Duration::days(5),
                completed: true,
            },
            RunRecord {
                store_id: store.id,
                created_at: as_of - Duration::days(4),
                completed: false,
            },
            RunRecord {
                store_id: store.id,
                created_at: as_of - Duration::days(30),
                completed: false,
            },
        ];
        let history = StoreHistory::new(store, coverage, responses, runs);

        let vector = FeatureExtractor::default().extract(&history, &template, as_of);

        assert!((vector.days_since_last_checked() - 4.0).abs() < 1e-4);
        // 2 failures out of 3 hygiene responses inside the window.
        assert!((vector.features[index::CATEGORY_FAIL_RATE] - 2.0 / 3.0).abs() < 1e-6);
        assert!(vector.failed_last_time());
        assert!((vector.features[index::STORE_COMPLETION_RATE] - 0.5).abs() < 1e-6);
        assert!((vector.features[index::SENTIMENT] + 0.5).abs() < 1e-6);
        assert_eq!(&vector.features[index::SEGMENT_START..], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let store = store(Some(Segment::Medium));
        let template = Template::new(store.brand_id, "Date labels", "food_safety", Severity::High);
        let as_of = Utc::now();
        let responses = vec![response(
            &store,
            &template,
            CheckStatus::Fail,
            as_of - Duration::hours(30),
        )];
        let history = StoreHistory::new(store, Vec::new(), responses, Vec::new());
        let extractor = FeatureExtractor::default();

        let first = extractor.extract(&history, &template, as_of);
        let second = extractor.extract(&history.clone(), &template, as_of);
        assert_eq!(first.to_bytes(), second.to_bytes());
    }

    #[test]
    fn test_training_samples_exclude_own_response() {
        let store = store(None);
        let template = Template::new(store.brand_id, "Freezer", "food_safety", Severity::High);
        let start = Utc::now() - Duration::days(10);
        let responses = vec![
            response(&store, &template, CheckStatus::Fail, start),
            response(&store, &template, CheckStatus::Pass, start + Duration::days(2)),
        ];
        let history = StoreHistory::new(store, Vec::new(), responses, Vec::new());
        let arena = TemplateArena::from_records([template]);

        let samples = FeatureExtractor::default().extract_training_samples(
            &history,
            &arena,
            start - Duration::days(1),
        );

        assert_eq!(samples.len(), 2);
        assert!(samples[0].failed);
        // First response had no earlier history: never checked, no rate evidence.
        assert!((samples[0].features.days_since_last_checked() - NEVER_CHECKED_DAYS).abs() < 1e-3);
        assert!(samples[0].features.features[index::CATEGORY_FAIL_RATE].abs() < f32::EPSILON);
        // Second sees the first as its last check.
        assert!(!samples[1].failed);
        assert!((samples[1].features.days_since_last_checked() - 2.0).abs() < 1e-4);
        assert!(samples[1].features.failed_last_time());
        assert!((samples[1].features.features[index::CATEGORY_FAIL_RATE] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_schema_fingerprint_tracks_order() {
        let fingerprint = feature_schema_fingerprint();
        assert_eq!(fingerprint.len(), 64);
        assert_eq!(fingerprint, schema_fingerprint(&FEATURE_NAMES));

        let mut reordered = FEATURE_NAMES;
        reordered.swap(0, 1);
        assert_ne!(fingerprint, schema_fingerprint(&reordered));
    }
}
