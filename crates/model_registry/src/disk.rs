//! Local persistent cache of registered models.
//!
//! One JSON file per scope under the cache directory. Entries expire by file
//! modification time and unreadable entries are removed, so every failure
//! here degrades to a miss.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use check_structs::ModelScope;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::metadata::RegisteredModel;

const ENTRY_FILE: &str = "latest.json";

/// TTL-bound on-disk model cache.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    ttl: Duration,
}

impl DiskCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cache file for a scope.
    #[must_use]
    pub fn entry_path(&self, scope: &ModelScope) -> PathBuf {
        self.dir.join(scope.relative_dir()).join(ENTRY_FILE)
    }

    /// Reads a fresh entry.
    ///
    /// Expired entries return `Ok(None)`. Corrupt entries are deleted and
    /// reported as [`CacheError::Corrupt`].
    pub fn read(&self, scope: &ModelScope) -> Result<Option<RegisteredModel>, CacheError> {
        let path = self.entry_path(scope);
        let modified = match fs::metadata(&path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age >= self.ttl {
            debug!(scope = %scope, age_secs = age.as_secs(), "Disk cache entry expired");
            return Ok(None);
        }

        let bytes = fs::read(&path)?;
        match serde_json::from_slice::<RegisteredModel>(&bytes) {
            Ok(model) => Ok(Some(model)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Removing corrupt disk cache entry");
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %remove_err, "Failed to remove corrupt entry");
                }
                Err(e.into())
            }
        }
    }

    /// Writes an entry through a temporary file and a rename, so readers
    /// never observe a partial file.
    pub fn write(&self, scope: &ModelScope, model: &RegisteredModel) -> Result<(), CacheError> {
        let path = self.entry_path(scope);
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        fs::create_dir_all(parent)?;

        let bytes = serde_json::to_vec(model)?;
        // Unique per writer, so concurrent reloads of one scope never share a temp file.
        let mut file = NamedTempFile::new_in(parent)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Removes a scope's entry. Missing entries are not an error.
    pub fn remove(&self, scope: &ModelScope) -> Result<(), CacheError> {
        match fs::remove_file(self.entry_path(scope)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Removes every cached entry.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
