//! Engine configuration.
//!
//! Every tunable the selection engine uses (smoothing pseudo-counts, blend
//! weights, cache TTLs, training gates) lives in one immutable [`EngineConfig`]
//! built once at startup and handed to each component's constructor.

use core::str::FromStr;
use core::time::Duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use serde::{Deserialize, Serialize};

/// Returns the base path for the model object store.
#[must_use]
pub fn get_model_store_path() -> PathBuf {
    dotenvy::dotenv().ok();

    std::env::var("MODEL_STORE_PATH").map_or_else(|_| PathBuf::from("./model_store"), PathBuf::from)
}

/// Builds the remote tier of the model registry rooted at `base_path`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or opened.
pub fn build_object_store(base_path: &Path) -> anyhow::Result<Arc<dyn ObjectStore>> {
    std::fs::create_dir_all(base_path).with_context(|| {
        format!(
            "Failed to create object store directory {}",
            base_path.display()
        )
    })?;

    let store =
        LocalFileSystem::new_with_prefix(base_path).context("Failed to create object store")?;
    Ok(Arc::new(store))
}

/// Connection settings for the operational database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection string.
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Loads database settings from the environment.
    ///
    /// Required environment variables:
    /// - `DATABASE_URL`: `PostgreSQL` connection string
    ///
    /// Optional environment variables:
    /// - `DATABASE_MAX_CONNECTIONS` (default: 5)
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or the pool size is not a number.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")?;
        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", 5)?;

        Ok(Self {
            url,
            max_connections,
        })
    }
}

/// Pseudo-counts of the Beta prior used for local failure estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorConfig {
    /// Pseudo-failures.
    pub alpha: f64,
    /// Pseudo-passes.
    pub beta: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 3.0,
        }
    }
}

/// Scoring and photo-evidence settings for the selector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// `K` in the cold-start weight `total / (total + K)`.
    pub cold_start_k: f64,
    /// Weight of the normalized rule score when a model is available.
    pub rule_weight: f64,
    /// Weight of the normalized blended probability when a model is available.
    pub ml_weight: f64,
    /// Probability that an otherwise photo-free item is picked for audit.
    pub audit_probability: f64,
    /// Require photo evidence for every CRITICAL template.
    pub critical_requires_photo: bool,
    /// Trailing window for rate features, in days.
    pub history_window_days: i64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            cold_start_k: 10.0,
            rule_weight: 0.6,
            ml_weight: 0.4,
            audit_probability: 0.10,
            critical_requires_photo: false,
            history_window_days: 14,
        }
    }
}

/// Cache and key layout for the model registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Key prefix inside the remote store.
    pub prefix: String,
    /// File extension of model artifacts.
    pub artifact_extension: String,
    pub memory_ttl: Duration,
    pub memory_capacity: u64,
    pub disk_ttl: Duration,
    /// Directory of the local persistent cache.
    pub cache_dir: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefix: "models".to_string(),
            artifact_extension: "model".to_string(),
            memory_ttl: Duration::from_secs(15 * 60),
            memory_capacity: 1_000,
            disk_ttl: Duration::from_secs(24 * 60 * 60),
            cache_dir: std::env::temp_dir().join("check_engine_models"),
        }
    }
}

/// How models are scoped when training every brand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeMode {
    /// One model per brand.
    PerBrand,
    /// One model per (brand, segment) where the brand has segmented stores.
    PerSegment,
}

impl FromStr for ScopeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "brand" | "per_brand" => Ok(Self::PerBrand),
            "segment" | "per_segment" => Ok(Self::PerSegment),
            other => anyhow::bail!("Unknown scope mode: {other}"),
        }
    }
}

/// What happens to a trained model whose metrics miss the quality thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishPolicy {
    /// Publish and log a warning.
    PublishAnyway,
    /// Keep the current latest model and report the rejection.
    BlockBelowThreshold,
}

impl FromStr for PublishPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "publish" | "publish_anyway" => Ok(Self::PublishAnyway),
            "block" | "block_below_threshold" => Ok(Self::BlockBelowThreshold),
            other => anyhow::bail!("Unknown publish policy: {other}"),
        }
    }
}

/// Settings for the batch training pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// Minimum labeled samples required before a scope is trained.
    pub min_samples: usize,
    /// Held-out fraction of the stratified split.
    pub test_fraction: f64,
    pub scope_mode: ScopeMode,
    pub publish_policy: PublishPolicy,
    pub min_precision: f64,
    pub min_recall: f64,
    pub min_f1: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seed for the split and shuffling.
    pub seed: u64,
    /// How far back history is read, in days.
    pub lookback_days: i64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            min_samples: 100,
            test_fraction: 0.2,
            scope_mode: ScopeMode::PerBrand,
            publish_policy: PublishPolicy::PublishAnyway,
            min_precision: 0.3,
            min_recall: 0.3,
            min_f1: 0.3,
            epochs: 60,
            batch_size: 64,
            learning_rate: 0.05,
            seed: 42,
            lookback_days: 365,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub prior: PriorConfig,
    pub selector: SelectorConfig,
    pub registry: RegistryConfig,
    pub training: TrainingSettings,
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Recognised variables:
    /// - `PRIOR_ALPHA`, `PRIOR_BETA`
    /// - `SELECTOR_COLD_START_K`, `SELECTOR_RULE_WEIGHT`, `SELECTOR_ML_WEIGHT`,
    ///   `SELECTOR_AUDIT_PROBABILITY`, `SELECTOR_CRITICAL_REQUIRES_PHOTO`
    /// - `REGISTRY_PREFIX`, `REGISTRY_MEMORY_TTL_SECS`, `REGISTRY_DISK_TTL_SECS`,
    ///   `REGISTRY_CACHE_DIR`
    /// - `TRAINING_MIN_SAMPLES`, `TRAINING_TEST_FRACTION`, `TRAINING_SCOPE_MODE`,
    ///   `TRAINING_PUBLISH_POLICY`, `TRAINING_MIN_PRECISION`, `TRAINING_MIN_RECALL`,
    ///   `TRAINING_MIN_F1`, `TRAINING_EPOCHS`, `TRAINING_SEED`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let prior = PriorConfig {
            alpha: env_or("PRIOR_ALPHA", defaults.prior.alpha)?,
            beta: env_or("PRIOR_BETA", defaults.prior.beta)?,
        };

        let selector = SelectorConfig {
            cold_start_k: env_or("SELECTOR_COLD_START_K", defaults.selector.cold_start_k)?,
            rule_weight: env_or("SELECTOR_RULE_WEIGHT", defaults.selector.rule_weight)?,
            ml_weight: env_or("SELECTOR_ML_WEIGHT", defaults.selector.ml_weight)?,
            audit_probability: env_or(
                "SELECTOR_AUDIT_PROBABILITY",
                defaults.selector.audit_probability,
            )?,
            critical_requires_photo: env_or(
                "SELECTOR_CRITICAL_REQUIRES_PHOTO",
                defaults.selector.critical_requires_photo,
            )?,
            history_window_days: defaults.selector.history_window_days,
        };

        let registry = RegistryConfig {
            prefix: env_or("REGISTRY_PREFIX", defaults.registry.prefix.clone())?,
            artifact_extension: defaults.registry.artifact_extension.clone(),
            memory_ttl: Duration::from_secs(env_or(
                "REGISTRY_MEMORY_TTL_SECS",
                defaults.registry.memory_ttl.as_secs(),
            )?),
            memory_capacity: defaults.registry.memory_capacity,
            disk_ttl: Duration::from_secs(env_or(
                "REGISTRY_DISK_TTL_SECS",
                defaults.registry.disk_ttl.as_secs(),
            )?),
            cache_dir: std::env::var("REGISTRY_CACHE_DIR")
                .map_or(defaults.registry.cache_dir.clone(), PathBuf::from),
        };

        let training = TrainingSettings {
            min_samples: env_or("TRAINING_MIN_SAMPLES", defaults.training.min_samples)?,
            test_fraction: env_or("TRAINING_TEST_FRACTION", defaults.training.test_fraction)?,
            scope_mode: env_or("TRAINING_SCOPE_MODE", defaults.training.scope_mode)?,
            publish_policy: env_or("TRAINING_PUBLISH_POLICY", defaults.training.publish_policy)?,
            min_precision: env_or("TRAINING_MIN_PRECISION", defaults.training.min_precision)?,
            min_recall: env_or("TRAINING_MIN_RECALL", defaults.training.min_recall)?,
            min_f1: env_or("TRAINING_MIN_F1", defaults.training.min_f1)?,
            epochs: env_or("TRAINING_EPOCHS", defaults.training.epochs)?,
            seed: env_or("TRAINING_SEED", defaults.training.seed)?,
            ..defaults.training
        };

        let config = Self {
            prior,
            selector,
            registry,
            training,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would break the estimators.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.prior.alpha > 0.0 && self.prior.beta > 0.0,
            "Prior pseudo-counts must be positive"
        );
        anyhow::ensure!(
            self.selector.cold_start_k > 0.0,
            "Cold-start constant must be positive"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.selector.audit_probability),
            "Audit probability must be within [0, 1]"
        );
        anyhow::ensure!(
            self.training.test_fraction > 0.0 && self.training.test_fraction < 1.0,
            "Test fraction must be within (0, 1)"
        );
        anyhow::ensure!(self.training.batch_size > 0, "Batch size must be positive");
        anyhow::ensure!(
            !self.registry.artifact_extension.is_empty()
                && self.registry.artifact_extension != "json",
            "Artifact extension must be non-empty and differ from the metadata extension"
        );
        Ok(())
    }
}

/// Parses `key` from the environment, or returns `default` when unset.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}
