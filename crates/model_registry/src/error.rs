//! Error types for the model registry.

use check_structs::ModelScope;
use thiserror::Error;

/// Errors surfaced by registry writes and explicit version operations.
///
/// `load` never returns these; it logs them and reports a missing model.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("remote store error: {0}")]
    Remote(#[from] object_store::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid model metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid model artifact: {0}")]
    InvalidArtifact(String),

    #[error("artifact for {scope} version {version} does not match its content hash")]
    ContentMismatch { scope: ModelScope, version: String },

    #[error("no model version {version} for {scope}")]
    VersionNotFound { scope: ModelScope, version: String },
}

/// Errors from the local persistent cache. Always recoverable by re-fetching.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}
