//! Storage and retrieval of trained failure predictors.
//!
//! [`ModelRegistry`] serves the latest predictor per [`check_structs::ModelScope`]
//! through an in-process cache, a local persistent cache and a remote
//! `object_store`, and keeps every published version for audit and rollback.

pub mod disk;
pub mod error;
pub mod metadata;
pub mod registry;

pub use disk::DiskCache;
pub use error::{CacheError, RegistryError};
pub use metadata::{ModelMetadata, RegisteredModel, content_hash};
pub use registry::ModelRegistry;
