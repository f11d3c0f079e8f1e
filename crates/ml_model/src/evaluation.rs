//! Held-out evaluation of a trained predictor.

use feature_extractor::TrainingSample;
use serde::{Deserialize, Serialize};

use crate::FailurePredictor;

/// Classification metrics on the failure class at a 0.5 threshold.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    /// Share of evaluated samples labeled as failures.
    pub positive_rate: f64,
    /// Number of evaluated samples.
    pub support: usize,
}

impl EvaluationMetrics {
    /// Whether every metric reaches its minimum.
    #[must_use]
    pub fn meets(&self, min_precision: f64, min_recall: f64, min_f1: f64) -> bool {
        self.precision >= min_precision && self.recall >= min_recall && self.f1 >= min_f1
    }
}

/// Scores `samples` with `predictor` and computes metrics for the failure class.
///
/// Undefined ratios (no predicted or no actual failures) are reported as 0.
#[must_use]
pub fn evaluate(predictor: &FailurePredictor, samples: &[TrainingSample]) -> EvaluationMetrics {
    let mut true_positives = 0usize;
    let mut false_positives = 0usize;
    let mut false_negatives = 0usize;
    let mut true_negatives = 0usize;

    for sample in samples {
        let predicted = predictor.predict_probability(&sample.features) >= 0.5;
        match (predicted, sample.failed) {
            (true, true) => true_positives += 1,
            (true, false) => false_positives += 1,
            (false, true) => false_negatives += 1,
            (false, false) => true_negatives += 1,
        }
    }

    let ratio = |num: usize, den: usize| {
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    };

    let precision = ratio(true_positives, true_positives + false_positives);
    let recall = ratio(true_positives, true_positives + false_negatives);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    EvaluationMetrics {
        precision,
        recall,
        f1,
        accuracy: ratio(true_positives + true_negatives, samples.len()),
        positive_rate: ratio(true_positives + false_negatives, samples.len()),
        support: samples.len(),
    }
}
