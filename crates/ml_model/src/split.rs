//! Stratified train/test splitting.

use feature_extractor::TrainingSample;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Splits samples into train and test sets, keeping the failure rate of
/// each class roughly equal on both sides.
///
/// Each class contributes `round(len * test_fraction)` samples to the test
/// set, but never all of them while it has more than one, so both sides see
/// both classes whenever that is possible.
///
/// # Arguments
///
/// * `samples` - Labeled samples to split.
/// * `test_fraction` - Fraction of each class held out, clamped to `[0, 1)`.
/// * `seed` - Shuffle seed; equal seeds give equal splits.
#[must_use]
pub fn stratified_split(
    samples: &[TrainingSample],
    test_fraction: f64,
    seed: u64,
) -> (Vec<TrainingSample>, Vec<TrainingSample>) {
    let fraction = test_fraction.clamp(0.0, 0.99);
    let mut rng = StdRng::seed_from_u64(seed);

    let (mut failures, mut passes): (Vec<TrainingSample>, Vec<TrainingSample>) =
        samples.iter().partition(|s| s.failed);
    failures.shuffle(&mut rng);
    passes.shuffle(&mut rng);

    let mut train = Vec::with_capacity(samples.len());
    let mut test = Vec::new();

    for class in [failures, passes] {
        let mut held_out = (class.len() as f64 * fraction).round() as usize;
        if class.len() > 1 {
            held_out = held_out.min(class.len() - 1);
        }
        if fraction > 0.0 && held_out == 0 && class.len() > 1 {
            held_out = 1;
        }
        let (test_part, train_part) = class.split_at(held_out.min(class.len()));
        test.extend_from_slice(test_part);
        train.extend_from_slice(train_part);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    (train, test)
}
