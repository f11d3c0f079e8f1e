//! Training logic for the failure model.

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::data::dataset::Dataset;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use feature_extractor::TrainingSample;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::dataset::{ClassWeights, FailureBatch, FailureBatcher, FailureDataset, Standardizer};
use crate::{FailureModel, FailurePredictor, TrainingConfig};

/// Backend used for CPU training.
pub type TrainBackend = Autodiff<NdArray>;

/// Probabilities are clamped away from 0 and 1 before taking logs.
const PROBABILITY_EPSILON: f64 = 1e-7;

/// Output from training.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    /// Final training loss.
    pub final_train_loss: f32,
    /// Number of epochs completed.
    pub epochs_completed: usize,
    /// Standardizer fitted on the training samples.
    pub standardizer: Standardizer,
    /// Class weights applied to the loss.
    pub class_weights: ClassWeights,
}

/// Trains the model on the provided samples.
///
/// Uses a simple training loop with Adam and class-weighted binary
/// cross-entropy, so a rare failure class still pulls on the weights.
///
/// # Arguments
///
/// * `model` - The model to train (will be modified in place).
/// * `samples` - The training split.
/// * `config` - Training configuration.
///
/// # Errors
///
/// Returns an error if there is nothing to train on.
pub fn train<B: AutodiffBackend>(
    model: &mut FailureModel<B>,
    samples: &[TrainingSample],
    config: &TrainingConfig,
) -> anyhow::Result<TrainingOutput> {
    if samples.is_empty() {
        return Err(anyhow::anyhow!("No training data provided"));
    }

    let device = model.devices().into_iter().next().unwrap_or_default();

    let standardizer = Standardizer::fit(samples);
    let class_weights = ClassWeights::balanced(samples);
    let dataset = FailureDataset::new(samples, &standardizer, class_weights);
    let batcher = FailureBatcher::<B>::new(device);

    let mut optimizer = AdamConfig::new().init::<B, FailureModel<B>>();
    let batch_size = config.batch_size.max(1);
    let mut final_train_loss = 0.0;

    for epoch in 0..config.epochs {
        let mut epoch_loss = 0.0;
        let mut batch_count = 0;

        let num_samples = dataset.len();
        let mut indices: Vec<usize> = (0..num_samples).collect();
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(epoch as u64));
        indices.shuffle(&mut rng);

        for batch_indices in indices.chunks(batch_size) {
            let items: Vec<_> = batch_indices
                .iter()
                .filter_map(|&i| dataset.get(i))
                .collect();

            if items.is_empty() {
                continue;
            }

            let batch = batcher.batch(items);
            let loss = weighted_bce_loss(model, batch);

            let loss_value: f32 = loss
                .clone()
                .into_data()
                .to_vec::<f32>()
                .unwrap_or_else(|_| vec![0.0])
                .first()
                .copied()
                .unwrap_or(0.0);

            epoch_loss += f64::from(loss_value);
            batch_count += 1;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, model);
            *model = optimizer.step(config.learning_rate, model.clone(), grads);
        }

        final_train_loss = if batch_count > 0 {
            (epoch_loss / f64::from(batch_count)) as f32
        } else {
            0.0
        };

        if epoch % 10 == 0 || epoch + 1 == config.epochs {
            debug!(epoch = epoch + 1, train_loss = final_train_loss, "Training progress");
        }
    }

    Ok(TrainingOutput {
        final_train_loss,
        epochs_completed: config.epochs,
        standardizer,
        class_weights,
    })
}

/// Trains a fresh model on the CPU backend and exports it for serving.
///
/// # Errors
///
/// Returns an error if training fails or the weights cannot be exported.
pub fn fit_predictor(
    samples: &[TrainingSample],
    config: &TrainingConfig,
) -> anyhow::Result<(FailurePredictor, TrainingOutput)> {
    let device = NdArrayDevice::default();
    let mut model = FailureModel::<TrainBackend>::new(&device);
    let output = train(&mut model, samples, config)?;
    let predictor = model.to_predictor(output.standardizer)?;
    Ok((predictor, output))
}

/// Class-weighted binary cross-entropy, averaged over the batch.
fn weighted_bce_loss<B: Backend>(model: &FailureModel<B>, batch: FailureBatch<B>) -> Tensor<B, 1> {
    let probabilities = sigmoid(model.forward(batch.inputs))
        .clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);

    let positive_term = batch.targets.clone() * probabilities.clone().log();
    let negative_term =
        batch.targets.neg().add_scalar(1.0) * probabilities.neg().add_scalar(1.0).log();

    ((positive_term + negative_term) * batch.weights).neg().mean()
}
