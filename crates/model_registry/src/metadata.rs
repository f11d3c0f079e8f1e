//! Typed model metadata, validated whenever it crosses a storage boundary.

use check_structs::{ModelScope, Segment};
use chrono::{DateTime, Utc};
use feature_extractor::{FEATURE_COUNT, FEATURE_NAMES, feature_schema_fingerprint, schema_fingerprint};
use ml_model::{EvaluationMetrics, FailurePredictor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::RegistryError;

/// Metadata stored next to every model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Version key, assigned by the registry on save.
    #[serde(default)]
    pub version: String,
    pub brand_id: Uuid,
    pub segment: Option<Segment>,
    pub trained_at: DateTime<Utc>,
    /// Total labeled samples before the split.
    pub sample_count: usize,
    pub train_count: usize,
    pub test_count: usize,
    pub metrics: EvaluationMetrics,
    pub final_train_loss: f32,
    /// Whether the held-out metrics reached the configured minimums.
    pub passed_quality_gate: bool,
    pub feature_names: Vec<String>,
    pub feature_schema_fingerprint: String,
    /// SHA-256 of the artifact bytes, assigned by the registry on save.
    #[serde(default)]
    pub content_hash: String,
}

impl ModelMetadata {
    /// Metadata for a freshly trained model using the running feature schema.
    #[must_use]
    pub fn new(scope: ModelScope, trained_at: DateTime<Utc>) -> Self {
        Self {
            version: String::new(),
            brand_id: scope.brand_id,
            segment: scope.segment,
            trained_at,
            sample_count: 0,
            train_count: 0,
            test_count: 0,
            metrics: EvaluationMetrics::default(),
            final_train_loss: 0.0,
            passed_quality_gate: false,
            feature_names: FEATURE_NAMES.iter().map(ToString::to_string).collect(),
            feature_schema_fingerprint: feature_schema_fingerprint(),
            content_hash: String::new(),
        }
    }

    #[must_use]
    pub const fn scope(&self) -> ModelScope {
        ModelScope {
            brand_id: self.brand_id,
            segment: self.segment,
        }
    }

    /// Whether the model was trained on the feature schema this process extracts.
    #[must_use]
    pub fn matches_current_schema(&self) -> bool {
        self.feature_schema_fingerprint == feature_schema_fingerprint()
    }

    /// Checks internal consistency: feature count and a fingerprint that
    /// agrees with the recorded feature names.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.feature_names.len() != FEATURE_COUNT {
            return Err(RegistryError::InvalidMetadata(format!(
                "expected {FEATURE_COUNT} feature names, found {}",
                self.feature_names.len()
            )));
        }
        if schema_fingerprint(&self.feature_names) != self.feature_schema_fingerprint {
            return Err(RegistryError::InvalidMetadata(
                "feature schema fingerprint does not match feature names".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks that `bytes` are the artifact this metadata describes.
    pub fn verify_artifact(&self, bytes: &[u8]) -> Result<(), RegistryError> {
        if content_hash(bytes) == self.content_hash {
            Ok(())
        } else {
            Err(RegistryError::ContentMismatch {
                scope: self.scope(),
                version: self.version.clone(),
            })
        }
    }
}

/// Hex SHA-256 of an artifact body.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// A predictor together with the metadata it was published with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub predictor: FailurePredictor,
    pub metadata: ModelMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metadata_is_valid() {
        let metadata = ModelMetadata::new(ModelScope::brand(Uuid::new_v4()), Utc::now());
        assert!(metadata.validate().is_ok());
        assert!(metadata.matches_current_schema());
    }

    #[test]
    fn test_wrong_feature_count_rejected() {
        let mut metadata = ModelMetadata::new(ModelScope::brand(Uuid::new_v4()), Utc::now());
        metadata.feature_names.pop();
        assert!(matches!(
            metadata.validate(),
            Err(RegistryError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_inconsistent_fingerprint_rejected() {
        let mut metadata = ModelMetadata::new(ModelScope::brand(Uuid::new_v4()), Utc::now());
        metadata.feature_names.swap(0, 1);
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_verify_artifact() {
        let mut metadata = ModelMetadata::new(ModelScope::brand(Uuid::new_v4()), Utc::now());
        metadata.content_hash = content_hash(b"weights");
        assert!(metadata.verify_artifact(b"weights").is_ok());
        assert!(matches!(
            metadata.verify_artifact(b"tampered"),
            Err(RegistryError::ContentMismatch { .. })
        ));
    }
}
