//! ML model crate for check failure prediction.
//!
//! This crate uses the Burn deep learning framework to train a logistic
//! failure classifier over the extractor's feature vectors, and exports the
//! trained weights as a plain [`FailurePredictor`] that can be serialized,
//! cached and scored without a tensor backend. It also hosts the
//! Beta-smoothed local prior used for cold-start blending.

use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use feature_extractor::{FEATURE_COUNT, FeatureVector, TrainingSample};
use serde::{Deserialize, Serialize};

pub mod dataset;
pub mod evaluation;
pub mod prior;
pub mod split;
pub mod training;

pub use dataset::{ClassWeights, Standardizer};
pub use evaluation::{EvaluationMetrics, evaluate};
pub use prior::{LocalPrior, PriorEstimate, blend, cold_start_weight};
pub use split::stratified_split;
pub use training::{TrainBackend, TrainingOutput, fit_predictor, train};

/// Configuration for training the model.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Learning rate for the optimizer.
    pub learning_rate: f64,
    /// Number of training epochs.
    pub epochs: usize,
    /// Batch size for training.
    pub batch_size: usize,
    /// Seed for per-epoch shuffling.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            epochs: 60,
            batch_size: 64,
            seed: 42,
        }
    }
}

/// The failure classification model.
///
/// A single linear layer over standardized features; the sigmoid of its
/// output is the predicted failure probability.
#[derive(Module, Debug)]
pub struct FailureModel<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> FailureModel<B> {
    /// Creates a zero-initialized model, so training is deterministic.
    pub fn new(device: &B::Device) -> Self {
        let linear = LinearConfig::new(FEATURE_COUNT, 1)
            .with_initializer(Initializer::Zeros)
            .init(device);
        Self { linear }
    }

    /// Forward pass producing logits.
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape [`batch_size`, `FEATURE_COUNT`]
    ///
    /// # Returns
    ///
    /// Tensor of shape [`batch_size`, 1] containing failure logits.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(input)
    }

    /// Forward pass producing failure probabilities.
    pub fn forward_probability(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        sigmoid(self.forward(input))
    }

    /// Exports the trained weights together with the standardizer they expect.
    ///
    /// # Errors
    ///
    /// Returns an error if the weight tensors cannot be read back.
    pub fn to_predictor(&self, standardizer: Standardizer) -> anyhow::Result<FailurePredictor> {
        let weight = self
            .linear
            .weight
            .val()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to read model weights: {e:?}"))?;

        let bias = match &self.linear.bias {
            Some(bias) => bias
                .val()
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| anyhow::anyhow!("Failed to read model bias: {e:?}"))?
                .first()
                .copied()
                .unwrap_or(0.0),
            None => 0.0,
        };

        let weights: [f32; FEATURE_COUNT] = weight.try_into().map_err(|w: Vec<f32>| {
            anyhow::anyhow!("Expected {FEATURE_COUNT} weights, got {}", w.len())
        })?;

        Ok(FailurePredictor {
            weights,
            bias,
            standardizer,
        })
    }
}

/// Serving form of a trained model: logistic weights over standardized features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailurePredictor {
    pub weights: [f32; FEATURE_COUNT],
    pub bias: f32,
    pub standardizer: Standardizer,
}

impl FailurePredictor {
    /// Predicted probability that the check fails.
    #[must_use]
    pub fn predict_probability(&self, features: &FeatureVector) -> f64 {
        let standardized = self.standardizer.apply(features);
        let logit = standardized
            .iter()
            .zip(self.weights)
            .fold(f64::from(self.bias), |acc, (x, w)| {
                f64::from(*x).mul_add(f64::from(w), acc)
            });
        1.0 / (1.0 + (-logit).exp())
    }

    /// Serializes the predictor into an artifact body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an artifact body produced by [`FailurePredictor::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid predictor.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let predictor: Self = serde_json::from_slice(bytes)?;
        anyhow::ensure!(
            predictor.weights.iter().all(|w| w.is_finite()) && predictor.bias.is_finite(),
            "Predictor contains non-finite weights"
        );
        Ok(predictor)
    }
}

/// Training data container.
#[derive(Debug, Clone, Default)]
pub struct TrainingData {
    pub samples: Vec<TrainingSample>,
}

impl TrainingData {
    /// Creates a new empty training data container.
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Adds samples to the training data.
    pub fn add_samples(&mut self, samples: Vec<TrainingSample>) {
        self.samples.extend(samples);
    }

    /// Returns the number of samples.
    pub const fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if there are no samples.
    pub const fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of failure-labeled samples.
    pub fn positives(&self) -> usize {
        self.samples.iter().filter(|s| s.failed).count()
    }
}
