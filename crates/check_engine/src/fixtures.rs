//! In-memory history and registry helpers for tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use check_structs::{
    CheckCoverage, CheckStatus, HistorySource, LocalPriorStats, ResponseRecord, RunRecord, Segment,
    Severity, Store, StoreHistory, Template, TemplateArena,
};
use chrono::{DateTime, Utc};
use config::RegistryConfig;
use futures::StreamExt;
use futures::stream::BoxStream;
use model_registry::ModelRegistry;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload, PutResult,
};
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryHistory {
    pub stores: Vec<Store>,
    pub templates: Vec<Template>,
    pub coverage: Vec<CheckCoverage>,
    pub responses: Vec<ResponseRecord>,
    pub runs: Vec<RunRecord>,
    pub stats: Vec<LocalPriorStats>,
    /// Brands whose history reads fail.
    pub failing_brands: HashSet<Uuid>,
}

impl InMemoryHistory {
    pub fn add_store(&mut self, brand_id: Uuid, segment: Option<Segment>) -> Store {
        let store = Store {
            id: Uuid::new_v4(),
            brand_id,
            name: format!("Store {}", self.stores.len() + 1),
            segment,
        };
        self.stores.push(store.clone());
        store
    }

    pub fn add_template(&mut self, brand_id: Uuid, category: &str, severity: Severity) -> Template {
        let title = format!("Check {}", self.templates.len() + 1);
        let template = Template::new(brand_id, &title, category, severity);
        self.templates.push(template.clone());
        template
    }

    /// Records a response the way the database write path does.
    pub fn respond(&mut self, store: &Store, template: &Template, status: CheckStatus, at: DateTime<Utc>) {
        self.responses.push(ResponseRecord {
            store_id: store.id,
            template_id: template.id,
            category: template.category.clone(),
            status,
            answered_at: at,
        });

        match self
            .coverage
            .iter_mut()
            .find(|c| c.store_id == store.id && c.template_id == template.id)
        {
            Some(row) => row.apply(status, at),
            None => self
                .coverage
                .push(CheckCoverage::first(store.id, template.id, status, at)),
        }

        match self
            .stats
            .iter_mut()
            .find(|s| s.store_id == store.id && s.template_id == template.id)
        {
            Some(stats) => stats.record(status),
            None => {
                let mut stats = LocalPriorStats::empty(store.id, template.id);
                stats.record(status);
                self.stats.push(stats);
            }
        }
    }

    pub fn run(&mut self, store: &Store, at: DateTime<Utc>, completed: bool) {
        self.runs.push(RunRecord {
            store_id: store.id,
            created_at: at,
            completed,
        });
    }

    fn check_brand(&self, brand_id: Uuid) -> anyhow::Result<()> {
        if self.failing_brands.contains(&brand_id) {
            anyhow::bail!("history unavailable for brand {brand_id}");
        }
        Ok(())
    }
}

#[async_trait]
impl HistorySource for InMemoryHistory {
    async fn brands(&self) -> anyhow::Result<Vec<Uuid>> {
        let mut brands: Vec<Uuid> = self.stores.iter().map(|s| s.brand_id).collect();
        brands.sort();
        brands.dedup();
        Ok(brands)
    }

    async fn store(&self, store_id: Uuid) -> anyhow::Result<Option<Store>> {
        Ok(self.stores.iter().find(|s| s.id == store_id).cloned())
    }

    async fn stores_for_brand(&self, brand_id: Uuid) -> anyhow::Result<Vec<Store>> {
        Ok(self
            .stores
            .iter()
            .filter(|s| s.brand_id == brand_id)
            .cloned()
            .collect())
    }

    async fn templates_for_brand(&self, brand_id: Uuid) -> anyhow::Result<TemplateArena> {
        self.check_brand(brand_id)?;
        Ok(TemplateArena::from_records(
            self.templates
                .iter()
                .filter(|t| t.brand_id == brand_id)
                .cloned(),
        ))
    }

    async fn store_history(&self, store: &Store, since: DateTime<Utc>) -> anyhow::Result<StoreHistory> {
        self.check_brand(store.brand_id)?;
        Ok(StoreHistory::new(
            store.clone(),
            self.coverage
                .iter()
                .filter(|c| c.store_id == store.id)
                .cloned()
                .collect(),
            self.responses
                .iter()
                .filter(|r| r.store_id == store.id && r.answered_at >= since)
                .cloned()
                .collect(),
            self.runs
                .iter()
                .filter(|r| r.store_id == store.id && r.created_at >= since)
                .cloned()
                .collect(),
        ))
    }

    async fn prior_stats(&self, store_id: Uuid) -> anyhow::Result<Vec<LocalPriorStats>> {
        Ok(self
            .stats
            .iter()
            .filter(|s| s.store_id == store_id)
            .copied()
            .collect())
    }
}

/// A registry over an in-memory remote store with a temporary cache directory.
pub fn test_registry() -> (Arc<ModelRegistry>, Arc<dyn ObjectStore>, TempDir) {
    let remote: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let dir = tempfile::tempdir().unwrap();
    let config = RegistryConfig {
        cache_dir: dir.path().to_path_buf(),
        ..RegistryConfig::default()
    };
    let registry = Arc::new(ModelRegistry::new(Arc::clone(&remote), &config));
    (registry, remote, dir)
}

/// Remote store whose every call fails, as when the bucket is unreachable.
#[derive(Debug, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn error() -> object_store::Error {
        object_store::Error::Generic {
            store: "unavailable",
            source: "connection refused".into(),
        }
    }
}

impl std::fmt::Display for UnavailableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UnavailableStore")
    }
}

#[async_trait]
impl ObjectStore for UnavailableStore {
    async fn put_opts(
        &self,
        _location: &Path,
        _payload: PutPayload,
        _opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        Err(Self::error())
    }

    async fn put_multipart_opts(
        &self,
        _location: &Path,
        _opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        Err(Self::error())
    }

    async fn get_opts(&self, _location: &Path, _options: GetOptions) -> object_store::Result<GetResult> {
        Err(Self::error())
    }

    async fn delete(&self, _location: &Path) -> object_store::Result<()> {
        Err(Self::error())
    }

    fn list(&self, _prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        futures::stream::once(async { Err(Self::error()) }).boxed()
    }

    async fn list_with_delimiter(&self, _prefix: Option<&Path>) -> object_store::Result<ListResult> {
        Err(Self::error())
    }

    async fn copy(&self, _from: &Path, _to: &Path) -> object_store::Result<()> {
        Err(Self::error())
    }

    async fn copy_if_not_exists(&self, _from: &Path, _to: &Path) -> object_store::Result<()> {
        Err(Self::error())
    }
}

/// A registry whose remote tier is unreachable and whose local tiers are empty.
pub fn unavailable_registry() -> (Arc<ModelRegistry>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = RegistryConfig {
        cache_dir: dir.path().to_path_buf(),
        ..RegistryConfig::default()
    };
    let registry = Arc::new(ModelRegistry::new(Arc::new(UnavailableStore), &config));
    (registry, dir)
}
