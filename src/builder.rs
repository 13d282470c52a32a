//! Builder assembling a [`Repository`] from a backend and a [`StoreConfig`].

use std::sync::Arc;

use kstore_concurrency::Synchronizer;
use kstore_core::{Error, Result, Store};
use kstore_storage::{CachingStore, LoggingStore, MemoryStore, SynchronizedStore};
use tracing::info;

use crate::config::StoreConfig;
use crate::repository::Repository;

/// Builder for repository configuration.
///
/// # Example
///
/// ```ignore
/// // Defaults over the in-memory backend
/// let repo = Repository::builder().memory().open()?;
///
/// // Tuned stack over a custom backend
/// let repo = Repository::builder()
///     .backend(my_backend)
///     .synchronizer("8:CX")
///     .max_buffered_changes(256)
///     .logging(true)
///     .open()?;
/// ```
pub struct StoreBuilder {
    config: StoreConfig,
    backend: Option<Box<dyn Store>>,
}

impl StoreBuilder {
    /// Create a new builder with default settings and no backend.
    pub fn new() -> Self {
        Self::from_config(StoreConfig::default())
    }

    /// Start from a loaded configuration
    pub fn from_config(config: StoreConfig) -> Self {
        Self {
            config,
            backend: None,
        }
    }

    /// Store records in `backend`
    pub fn backend(mut self, backend: impl Store + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Store records in a fresh [`MemoryStore`]
    pub fn memory(self) -> Self {
        self.backend(MemoryStore::new())
    }

    /// Capacity of each global per-type cache
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Written ids tracked per type before a commit evicts the whole type
    pub fn max_changes(mut self, max_changes: usize) -> Self {
        self.config.max_changes = max_changes;
        self
    }

    /// Changes buffered per type before they are pushed to the backend
    pub fn max_buffered_changes(mut self, max_buffered_changes: usize) -> Self {
        self.config.max_buffered_changes = max_buffered_changes;
        self
    }

    /// Synchronizer specification (`"N"`, `"N:K"`, `"N:WX"`, `"N:CX"`)
    pub fn synchronizer(mut self, spec: impl Into<String>) -> Self {
        self.config.synchronizer = spec.into();
        self
    }

    /// Log every backend call at DEBUG
    pub fn logging(mut self, enabled: bool) -> Self {
        self.config.logging = enabled;
        self
    }

    /// Configuration collected so far
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Assemble the stack without initializing it
    fn build(self) -> Result<(SynchronizedStore, Arc<CachingStore>)> {
        self.config.validate()?;
        let backend = self
            .backend
            .ok_or_else(|| Error::invalid_argument("no backend configured"))?;
        let backend: Box<dyn Store> = if self.config.logging {
            Box::new(LoggingStore::new(backend))
        } else {
            backend
        };

        let cache = Arc::new(CachingStore::with_config(backend, self.config.cache_config())?);
        let synchronizer = Synchronizer::new(self.config.synchronizer_spec()?);
        let store = SynchronizedStore::new(Box::new(Arc::clone(&cache)), synchronizer);
        Ok((store, cache))
    }

    /// Assemble and initialize the stack.
    pub fn open(self) -> Result<Repository> {
        let logging = self.config.logging;
        let synchronizer = self.config.synchronizer.clone();
        let (store, cache) = self.build()?;
        store.init()?;
        info!(synchronizer = %synchronizer, logging, "repository opened");
        Ok(Repository::new(store, cache))
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
