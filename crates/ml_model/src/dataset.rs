//! Dataset, standardization and batching for Burn training.

use burn::prelude::*;
use burn::tensor::TensorData;
use feature_extractor::{FEATURE_COUNT, FeatureVector, TrainingSample};
use serde::{Deserialize, Serialize};

/// Per-feature mean and standard deviation computed on the training split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub means: [f32; FEATURE_COUNT],
    pub stds: [f32; FEATURE_COUNT],
}

impl Default for Standardizer {
    fn default() -> Self {
        Self {
            means: [0.0; FEATURE_COUNT],
            stds: [1.0; FEATURE_COUNT],
        }
    }
}

impl Standardizer {
    /// Fits means and standard deviations. Constant features get a std of 1.
    #[must_use]
    pub fn fit(samples: &[TrainingSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let n = samples.len() as f64;
        let mut sums = [0.0f64; FEATURE_COUNT];
        for sample in samples {
            for (sum, value) in sums.iter_mut().zip(sample.features.features) {
                *sum += f64::from(value);
            }
        }
        let means = sums.map(|sum| sum / n);

        let mut squares = [0.0f64; FEATURE_COUNT];
        for sample in samples {
            for ((square, value), mean) in squares
                .iter_mut()
                .zip(sample.features.features)
                .zip(means)
            {
                let delta = f64::from(value) - mean;
                *square += delta * delta;
            }
        }

        let stds = squares.map(|square| {
            let std = (square / n).sqrt();
            if std < 1e-6 { 1.0 } else { std as f32 }
        });

        Self {
            means: means.map(|m| m as f32),
            stds,
        }
    }

    #[must_use]
    pub fn apply(&self, vector: &FeatureVector) -> [f32; FEATURE_COUNT] {
        let mut out = vector.features;
        for ((value, mean), std) in out.iter_mut().zip(self.means).zip(self.stds) {
            *value = (*value - mean) / std;
        }
        out
    }
}

/// Balanced class weights: `n / (2 * n_class)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassWeights {
    pub positive: f32,
    pub negative: f32,
}

impl ClassWeights {
    /// Computes balanced weights. A missing class gets weight 1.
    #[must_use]
    pub fn balanced(samples: &[TrainingSample]) -> Self {
        let n = samples.len() as f64;
        let positives = samples.iter().filter(|s| s.failed).count() as f64;
        let negatives = n - positives;
        let weight = |count: f64| {
            if count > 0.0 {
                (n / (2.0 * count)) as f32
            } else {
                1.0
            }
        };
        Self {
            positive: weight(positives),
            negative: weight(negatives),
        }
    }

    #[must_use]
    pub const fn for_label(&self, failed: bool) -> f32 {
        if failed { self.positive } else { self.negative }
    }
}

/// A single standardized item in the failure dataset.
#[derive(Debug, Clone)]
pub struct FailureDatasetItem {
    /// Standardized feature vector.
    pub features: [f32; FEATURE_COUNT],
    /// 1.0 for a failure, 0.0 otherwise.
    pub target: f32,
    /// Class weight applied to this item's loss.
    pub weight: f32,
}

/// Dataset for failure classification.
#[derive(Debug, Clone)]
pub struct FailureDataset {
    items: Vec<FailureDatasetItem>,
}

impl FailureDataset {
    /// Creates a dataset from training samples, standardizing and weighting each item.
    #[must_use]
    pub fn new(
        samples: &[TrainingSample],
        standardizer: &Standardizer,
        weights: ClassWeights,
    ) -> Self {
        let items = samples
            .iter()
            .map(|sample| FailureDatasetItem {
                features: standardizer.apply(&sample.features),
                target: if sample.failed { 1.0 } else { 0.0 },
                weight: weights.for_label(sample.failed),
            })
            .collect();
        Self { items }
    }
}

impl burn::data::dataset::Dataset<FailureDatasetItem> for FailureDataset {
    fn get(&self, index: usize) -> Option<FailureDatasetItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of training data.
#[derive(Debug, Clone)]
pub struct FailureBatch<B: Backend> {
    /// Input features tensor of shape `[batch_size, FEATURE_COUNT]`.
    pub inputs: Tensor<B, 2>,
    /// Target labels tensor of shape `[batch_size, 1]`.
    pub targets: Tensor<B, 2>,
    /// Per-item loss weights of shape `[batch_size, 1]`.
    pub weights: Tensor<B, 2>,
}

/// Batcher for creating training batches.
#[derive(Debug, Clone)]
pub struct FailureBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> FailureBatcher<B> {
    #[must_use]
    pub const fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Creates a batch from a vector of items.
    pub fn batch(&self, items: Vec<FailureDatasetItem>) -> FailureBatch<B> {
        let batch_size = items.len();

        let mut features_data = Vec::with_capacity(batch_size * FEATURE_COUNT);
        let mut targets_data = Vec::with_capacity(batch_size);
        let mut weights_data = Vec::with_capacity(batch_size);

        for item in items {
            features_data.extend_from_slice(&item.features);
            targets_data.push(item.target);
            weights_data.push(item.weight);
        }

        let inputs = Tensor::<B, 2>::from_data(
            TensorData::new(features_data, [batch_size, FEATURE_COUNT]),
            &self.device,
        );
        let targets =
            Tensor::<B, 2>::from_data(TensorData::new(targets_data, [batch_size, 1]), &self.device);
        let weights =
            Tensor::<B, 2>::from_data(TensorData::new(weights_data, [batch_size, 1]), &self.device);

        FailureBatch {
            inputs,
            targets,
            weights,
        }
    }
}
