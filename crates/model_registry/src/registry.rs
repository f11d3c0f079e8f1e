//! Three-tier model registry.
//!
//! Reads go memory → local disk → remote store, and a hit at any tier
//! populates the faster ones. Writes publish an immutable versioned artifact
//! and then overwrite the scope's "latest" pointer.
//!
//! Remote layout, per scope:
//! `{prefix}/brand_{id}[/{segment}]/failure_predictor_latest.{ext}` and
//! `{prefix}/brand_{id}[/{segment}]/versions/failure_predictor_{version}.{ext}`,
//! each with a sibling `.json` metadata object.

use std::sync::Arc;

use check_structs::ModelScope;
use chrono::{TimeDelta, Utc};
use config::RegistryConfig;
use futures::TryStreamExt;
use ml_model::FailurePredictor;
use moka::sync::Cache;
use object_store::path::Path as ObjectStorePath;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, info, warn};

use crate::disk::DiskCache;
use crate::error::RegistryError;
use crate::metadata::{ModelMetadata, RegisteredModel, content_hash};

const ARTIFACT_STEM: &str = "failure_predictor";
const METADATA_EXTENSION: &str = "json";
/// Sortable UTC timestamp with microseconds.
const VERSION_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";

/// Object keys of one artifact and its metadata.
#[derive(Debug, Clone)]
struct ArtifactPaths {
    artifact: ObjectStorePath,
    metadata: ObjectStorePath,
}

/// Registry of trained failure predictors, keyed by [`ModelScope`].
pub struct ModelRegistry {
    remote: Arc<dyn ObjectStore>,
    memory: Cache<ModelScope, Arc<RegisteredModel>>,
    disk: DiskCache,
    prefix: String,
    extension: String,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("remote", &self.remote.to_string())
            .field("disk", &self.disk)
            .field("prefix", &self.prefix)
            .field("cached_scopes", &self.memory.entry_count())
            .finish_non_exhaustive()
    }
}

impl ModelRegistry {
    /// Creates a registry over `remote`, with local tiers sized by `config`.
    #[must_use]
    pub fn new(remote: Arc<dyn ObjectStore>, config: &RegistryConfig) -> Self {
        let memory = Cache::builder()
            .max_capacity(config.memory_capacity)
            .time_to_live(config.memory_ttl)
            .build();

        Self {
            remote,
            memory,
            disk: DiskCache::new(&config.cache_dir, config.disk_ttl),
            prefix: config.prefix.trim_matches('/').to_string(),
            extension: config.artifact_extension.clone(),
        }
    }

    fn scope_dir(&self, scope: &ModelScope) -> String {
        format!("{}/{}", self.prefix, scope.relative_dir())
    }

    fn paths(&self, dir: &str, name: &str) -> ArtifactPaths {
        ArtifactPaths {
            artifact: ObjectStorePath::from(format!("{dir}/{name}.{}", self.extension)),
            metadata: ObjectStorePath::from(format!("{dir}/{name}.{METADATA_EXTENSION}")),
        }
    }

    fn latest_paths(&self, scope: &ModelScope) -> ArtifactPaths {
        self.paths(&self.scope_dir(scope), &format!("{ARTIFACT_STEM}_latest"))
    }

    fn versions_dir(&self, scope: &ModelScope) -> String {
        format!("{}/versions", self.scope_dir(scope))
    }

    fn version_paths(&self, scope: &ModelScope, version: &str) -> ArtifactPaths {
        self.paths(&self.versions_dir(scope), &format!("{ARTIFACT_STEM}_{version}"))
    }

    /// Loads the latest model for a scope.
    ///
    /// Returns `None` when no model is published, when the remote store is
    /// unreachable, or when the model was trained on a different feature
    /// schema. None of these are errors for callers.
    pub async fn load(&self, scope: &ModelScope) -> Option<Arc<RegisteredModel>> {
        if let Some(model) = self.memory.get(scope) {
            debug!(scope = %scope, "Model served from memory");
            return Some(model);
        }

        match self.disk.read(scope) {
            Ok(Some(model)) if model.metadata.matches_current_schema() => {
                debug!(scope = %scope, version = %model.metadata.version, "Model served from disk cache");
                let model = Arc::new(model);
                self.memory.insert(*scope, Arc::clone(&model));
                return Some(model);
            }
            Ok(Some(model)) => {
                warn!(
                    scope = %scope,
                    version = %model.metadata.version,
                    "Cached model uses a different feature schema, discarding"
                );
                if let Err(e) = self.disk.remove(scope) {
                    warn!(scope = %scope, error = %e, "Failed to remove stale disk cache entry");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(scope = %scope, error = %e, "Disk cache read failed, falling back to remote"),
        }

        let model = match self.fetch(&self.latest_paths(scope)).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                debug!(scope = %scope, "No model published for scope");
                return None;
            }
            Err(e) => {
                warn!(scope = %scope, error = %e, "Failed to fetch model from remote store");
                return None;
            }
        };

        if !model.metadata.matches_current_schema() {
            warn!(
                scope = %scope,
                version = %model.metadata.version,
                expected = %feature_extractor::feature_schema_fingerprint(),
                found = %model.metadata.feature_schema_fingerprint,
                "Published model uses a different feature schema, ignoring"
            );
            return None;
        }

        info!(scope = %scope, version = %model.metadata.version, "Model fetched from remote store");
        Some(self.refresh_local(scope, model))
    }

    /// Publishes a predictor for a scope.
    ///
    /// Writes the versioned artifact and metadata first, then overwrites the
    /// latest pointer, then refreshes the local tiers. Returns the metadata
    /// as stored, with its assigned version and content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata is invalid for this scope or any
    /// remote write fails.
    pub async fn save(
        &self,
        predictor: &FailurePredictor,
        scope: &ModelScope,
        mut metadata: ModelMetadata,
    ) -> Result<ModelMetadata, RegistryError> {
        if metadata.scope() != *scope {
            return Err(RegistryError::InvalidMetadata(format!(
                "metadata describes {} but was saved to {scope}",
                metadata.scope()
            )));
        }
        metadata.validate()?;

        let artifact = serde_json::to_vec(predictor)?;
        metadata.version = self.next_version(scope).await?;
        metadata.content_hash = content_hash(&artifact);
        let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;

        let version_paths = self.version_paths(scope, &metadata.version);
        let latest_paths = self.latest_paths(scope);

        self.remote
            .put(&version_paths.artifact, PutPayload::from(artifact.clone()))
            .await?;
        self.remote
            .put(&version_paths.metadata, PutPayload::from(metadata_bytes.clone()))
            .await?;
        self.remote
            .put(&latest_paths.artifact, PutPayload::from(artifact))
            .await?;
        self.remote
            .put(&latest_paths.metadata, PutPayload::from(metadata_bytes))
            .await?;

        info!(
            scope = %scope,
            version = %metadata.version,
            path = %version_paths.artifact,
            "Model published"
        );

        self.refresh_local(
            scope,
            RegisteredModel {
                predictor: *predictor,
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    /// Drops a scope from the local tiers. The next load re-reads the remote store.
    pub fn invalidate(&self, scope: &ModelScope) {
        self.memory.invalidate(scope);
        if let Err(e) = self.disk.remove(scope) {
            warn!(scope = %scope, error = %e, "Failed to remove disk cache entry");
        }
    }

    /// Metadata of every published version of a scope, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or reading the remote store fails.
    pub async fn list_versions(&self, scope: &ModelScope) -> Result<Vec<ModelMetadata>, RegistryError> {
        let prefix = ObjectStorePath::from(self.versions_dir(scope));
        let objects: Vec<_> = self.remote.list(Some(&prefix)).try_collect().await?;

        let mut versions = Vec::new();
        for object in objects {
            let is_metadata = object
                .location
                .extension()
                .is_some_and(|ext| ext == METADATA_EXTENSION);
            if !is_metadata {
                continue;
            }
            let bytes = self.remote.get(&object.location).await?.bytes().await?;
            match serde_json::from_slice::<ModelMetadata>(&bytes) {
                Ok(metadata) => versions.push(metadata),
                Err(e) => {
                    warn!(path = %object.location, error = %e, "Skipping unreadable model metadata");
                }
            }
        }

        versions.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(versions)
    }

    /// Loads one immutable version, bypassing the local tiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote store fails or the stored artifact is invalid.
    pub async fn load_version(
        &self,
        scope: &ModelScope,
        version: &str,
    ) -> Result<Option<RegisteredModel>, RegistryError> {
        self.fetch(&self.version_paths(scope, version)).await
    }

    /// Points a scope's latest model at an existing version (rollback).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::VersionNotFound`] for an unknown version, or
    /// an error if the remote copy fails.
    pub async fn promote(&self, scope: &ModelScope, version: &str) -> Result<ModelMetadata, RegistryError> {
        let Some(model) = self.load_version(scope, version).await? else {
            return Err(RegistryError::VersionNotFound {
                scope: *scope,
                version: version.to_string(),
            });
        };

        let source = self.version_paths(scope, version);
        let latest = self.latest_paths(scope);
        self.remote.copy(&source.artifact, &latest.artifact).await?;
        self.remote.copy(&source.metadata, &latest.metadata).await?;

        info!(scope = %scope, version, "Model promoted to latest");
        let metadata = model.metadata.clone();
        self.refresh_local(scope, model);
        Ok(metadata)
    }

    /// Empties the memory and disk tiers.
    pub fn clear_local(&self) {
        self.memory.invalidate_all();
        if let Err(e) = self.disk.clear() {
            warn!(dir = %self.disk.dir().display(), error = %e, "Failed to clear disk cache");
        }
    }

    fn refresh_local(&self, scope: &ModelScope, model: RegisteredModel) -> Arc<RegisteredModel> {
        if let Err(e) = self.disk.write(scope, &model) {
            warn!(scope = %scope, error = %e, "Failed to write disk cache entry");
        }
        let model = Arc::new(model);
        self.memory.insert(*scope, Arc::clone(&model));
        model
    }

    /// Reads and validates one artifact with its metadata.
    async fn fetch(&self, paths: &ArtifactPaths) -> Result<Option<RegisteredModel>, RegistryError> {
        let Some(metadata_bytes) = self.get_optional(&paths.metadata).await? else {
            return Ok(None);
        };
        let metadata: ModelMetadata = serde_json::from_slice(&metadata_bytes)?;
        metadata.validate()?;

        let Some(artifact) = self.get_optional(&paths.artifact).await? else {
            return Err(RegistryError::InvalidArtifact(format!(
                "metadata present but artifact missing at {}",
                paths.artifact
            )));
        };
        metadata.verify_artifact(&artifact)?;

        let predictor = FailurePredictor::from_bytes(&artifact)
            .map_err(|e| RegistryError::InvalidArtifact(e.to_string()))?;
        Ok(Some(RegisteredModel {
            predictor,
            metadata,
        }))
    }

    async fn get_optional(&self, path: &ObjectStorePath) -> Result<Option<Vec<u8>>, RegistryError> {
        match self.remote.get(path).await {
            Ok(result) => Ok(Some(result.bytes().await?.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A version key not yet used by this scope.
    async fn next_version(&self, scope: &ModelScope) -> Result<String, RegistryError> {
        let mut at = Utc::now();
        loop {
            let version = at.format(VERSION_FORMAT).to_string();
            match self.remote.head(&self.version_paths(scope, &version).artifact).await {
                Err(object_store::Error::NotFound { .. }) => return Ok(version),
                Ok(_) => at += TimeDelta::microseconds(1),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
