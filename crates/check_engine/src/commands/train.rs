//! Train command - trains failure models for one scope or every brand.

use anyhow::Result;
use check_structs::Segment;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::pipeline::{TrainingOutcome, TrainingPipeline, TrainingResult};

/// Runs the train command.
///
/// # Errors
///
/// Returns an error if any scope failed to train.
pub async fn run(
    pipeline: &TrainingPipeline,
    brand: Option<Uuid>,
    segment: Option<Segment>,
    dry_run: bool,
) -> Result<()> {
    let results = match brand {
        Some(brand_id) => vec![pipeline.train(brand_id, segment, dry_run).await?],
        None => {
            if segment.is_some() {
                warn!("--segment is ignored without --brand");
            }
            pipeline.train_all(dry_run).await?
        }
    };

    for result in &results {
        report(result);
    }

    let failed = results.iter().filter(|r| r.is_failure()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} scope(s) failed to train", results.len());
    }
    Ok(())
}

fn report(result: &TrainingResult) {
    let scope = result.scope;
    match &result.outcome {
        TrainingOutcome::Published { version } => info!(
            scope = %scope,
            version = %version,
            samples = result.sample_count,
            f1 = result.metrics.map(|m| m.f1),
            "Published"
        ),
        TrainingOutcome::DryRun => info!(
            scope = %scope,
            samples = result.sample_count,
            precision = result.metrics.map(|m| m.precision),
            recall = result.metrics.map(|m| m.recall),
            f1 = result.metrics.map(|m| m.f1),
            passed = result.passed_quality_gate,
            "Dry run"
        ),
        TrainingOutcome::InsufficientData { samples, required } => {
            info!(scope = %scope, samples, required, "Skipped: insufficient data");
        }
        TrainingOutcome::Rejected { reason } => warn!(scope = %scope, reason = %reason, "Rejected"),
        TrainingOutcome::Failed { error } => error!(scope = %scope, error = %error, "Failed"),
    }
}
