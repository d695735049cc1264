//! Builder for assembling the pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::{CacheConfig, CacheStore, ProcessingCache};
use crate::client::{DEFAULT_BASE_URL, GenerationClient, HttpGenerationClient};
use crate::config::{Config, Secrets};
use crate::coordinator::jobs::{
    DEFAULT_CONCURRENCY, DEFAULT_QUEUE_CAPACITY, JobReceiver, WorkerPool, job_queue,
};
use crate::coordinator::{Coordinator, CoordinatorSettings};
use crate::store::{DocumentStore, FileStore, LocalFileStore, MemoryFileStore, MemoryStore};
use crate::types::UploadPolicy;
use crate::{CardsmithError, Result};

/// Main entry point for creating pipeline instances.
pub struct Cardsmith;

impl Cardsmith {
    /// Create a new builder for configuring the pipeline.
    pub fn builder() -> CardsmithBuilder {
        CardsmithBuilder::new()
    }
}

/// Builder for configuring the pipeline.
///
/// ```rust,no_run
/// # use cardsmith::Cardsmith;
/// # async fn example() -> cardsmith::Result<()> {
/// let pipeline = Cardsmith::builder()
///     .generation_service("https://generate.example.com", Some("sk-...".into()))
///     .files_dir("/var/lib/cardsmith")
///     .start()?;
/// # Ok(())
/// # }
/// ```
pub struct CardsmithBuilder {
    client: Option<Arc<dyn GenerationClient>>,
    base_url: Option<String>,
    api_key: Option<String>,
    stores: Option<(Arc<dyn DocumentStore>, Arc<dyn CacheStore>)>,
    files: Option<Arc<dyn FileStore>>,
    files_dir: Option<PathBuf>,
    cache_config: CacheConfig,
    policy: UploadPolicy,
    settings: CoordinatorSettings,
    concurrency: usize,
    queue_capacity: usize,
}

impl Default for CardsmithBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CardsmithBuilder {
    pub fn new() -> Self {
        Self {
            client: None,
            base_url: None,
            api_key: None,
            stores: None,
            files: None,
            files_dir: None,
            cache_config: CacheConfig::default(),
            policy: UploadPolicy::default(),
            settings: CoordinatorSettings::default(),
            concurrency: DEFAULT_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Start from loaded configuration and secrets.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Self {
        let mut builder = Self::new()
            .generation_service(
                config.generation.base_url.clone(),
                secrets.generation_api_key(),
            )
            .files_dir(config.storage.files_dir())
            .cache_config(config.cache_config())
            .upload_policy(config.uploads.clone())
            .settings(config.coordinator_settings())
            .concurrency(config.workers.concurrency);
        builder.queue_capacity = config.workers.queue_capacity;
        builder
    }

    /// Use the HTTP generation service at `base_url`.
    pub fn generation_service(
        mut self,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        self.base_url = Some(base_url.into());
        self.api_key = api_key;
        self
    }

    /// Use a custom generation client instead of the HTTP service.
    pub fn generation_client(mut self, client: Arc<dyn GenerationClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use a backend implementing both store traits. Defaults to a fresh
    /// [`MemoryStore`].
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: DocumentStore + CacheStore + 'static,
    {
        let documents: Arc<dyn DocumentStore> = store.clone();
        let cache: Arc<dyn CacheStore> = store;
        self.stores = Some((documents, cache));
        self
    }

    /// Use a custom file store.
    pub fn file_store(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = Some(files);
        self
    }

    /// Keep uploads on disk below `dir`. Without this or
    /// [`file_store`](Self::file_store), uploads stay in memory.
    pub fn files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = Some(dir.into());
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Delay before initial generation (default: 30 seconds).
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.settings.initial_delay = delay;
        self
    }

    /// Jobs run at once (default: 4).
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    /// Build the coordinator and hand back the job receiver undrained.
    ///
    /// Use [`start`](Self::start) to run jobs on a worker pool instead.
    pub fn build(self) -> Result<(Arc<Coordinator>, JobReceiver)> {
        if self.concurrency == 0 {
            return Err(CardsmithError::Configuration(
                "worker concurrency must be at least 1".into(),
            ));
        }

        let client: Arc<dyn GenerationClient> = match self.client {
            Some(client) => client,
            None => Arc::new(HttpGenerationClient::with_timeout(
                self.api_key,
                self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                self.settings.generation_timeout,
            )?),
        };

        let (documents, cache_store) = self.stores.unwrap_or_else(|| {
            let store = Arc::new(MemoryStore::new());
            (store.clone() as Arc<dyn DocumentStore>, store as Arc<dyn CacheStore>)
        });

        let files: Arc<dyn FileStore> = match (self.files, self.files_dir) {
            (Some(files), _) => files,
            (None, Some(dir)) => Arc::new(LocalFileStore::new(dir)),
            (None, None) => Arc::new(MemoryFileStore::new()),
        };

        let (queue, receiver) = job_queue(self.queue_capacity);
        let coordinator = Coordinator::new(
            ProcessingCache::new(cache_store, self.cache_config),
            documents,
            files,
            client,
            queue,
        )
        .with_policy(self.policy)
        .with_settings(self.settings);

        info!(
            initial_delay_secs = coordinator.settings().initial_delay.as_secs(),
            queue_capacity = self.queue_capacity,
            "pipeline built"
        );
        Ok((Arc::new(coordinator), receiver))
    }

    /// Build and start a worker pool draining the queue.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(self) -> Result<Pipeline> {
        let concurrency = self.concurrency;
        let (coordinator, receiver) = self.build()?;
        let workers = WorkerPool::spawn(receiver, coordinator.clone(), concurrency);
        Ok(Pipeline {
            coordinator,
            workers,
        })
    }
}

/// A running pipeline: the coordinator plus its worker pool.
pub struct Pipeline {
    coordinator: Arc<Coordinator>,
    workers: WorkerPool,
}

impl Pipeline {
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Stop taking new jobs. Jobs already running are not interrupted.
    pub fn shutdown(self) {
        self.workers.abort();
    }
}
