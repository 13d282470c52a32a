//! Main entry point for kstore.
//!
//! A [`Repository`] is a fully assembled store stack:
//!
//! ```text
//! caller ─▶ SynchronizedStore ─▶ CachingStore ─▶ [LoggingStore] ─▶ backend
//! ```
//!
//! The outer layer enforces admission and lifecycle rules, so the cache
//! below it never sees a transaction outliving the store.

use std::fmt;
use std::sync::Arc;

use kstore_concurrency::{Interrupt, Synchronizer};
use kstore_core::{Result, Store, Transaction};
use kstore_storage::{CacheStats, CachingStore, SynchronizedStore};

use tracing::error;

use crate::builder::StoreBuilder;

/// An initialized store stack.
///
/// # Example
///
/// ```ignore
/// use kstore::prelude::*;
///
/// let repo = Repository::memory()?;
/// repo.write(|tx| tx.store(RecordType::Entity, Record::new("ex:alice")))?;
/// let alice = repo.read(|tx| tx.lookup(RecordType::Entity, &[Uri::new("ex:alice")], None)?.to_vec())?;
/// repo.close();
/// ```
pub struct Repository {
    store: SynchronizedStore,
    cache: Arc<CachingStore>,
}

impl Repository {
    /// Create a builder for repository configuration.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Open a repository over a fresh in-memory backend with default settings.
    pub fn memory() -> Result<Self> {
        StoreBuilder::new().memory().open()
    }

    pub(crate) fn new(store: SynchronizedStore, cache: Arc<CachingStore>) -> Self {
        Self { store, cache }
    }

    /// Start a transaction, blocking until the synchronizer admits it.
    pub fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>> {
        self.store.begin(read_only)
    }

    /// Like [`Repository::begin`], but the wait for admission fails with
    /// `Error::Interrupted` once `interrupt` is set.
    pub fn begin_interruptible(
        &self,
        read_only: bool,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn Transaction>> {
        self.store.begin_interruptible(read_only, interrupt)
    }

    /// Run `f` in a read-only transaction
    pub fn read<T>(&self, f: impl FnOnce(&mut dyn Transaction) -> Result<T>) -> Result<T> {
        let mut tx = self.begin(true)?;
        let result = f(tx.as_mut());
        tx.end(false)?;
        result
    }

    /// Run `f` in a read-write transaction.
    ///
    /// Commits if `f` succeeds, rolls back otherwise.
    pub fn write<T>(&self, f: impl FnOnce(&mut dyn Transaction) -> Result<T>) -> Result<T> {
        let mut tx = self.begin(false)?;
        match f(tx.as_mut()) {
            Ok(value) => {
                tx.end(true)?;
                Ok(value)
            }
            Err(e) => {
                // The transaction is ended either way; the first error wins
                if let Err(rollback) = tx.end(false) {
                    error!(error = %rollback, cause = %e, "rollback after failed write failed");
                }
                Err(e)
            }
        }
    }

    /// Admission controller of the outer layer
    pub fn synchronizer(&self) -> &Synchronizer {
        self.store.synchronizer()
    }

    /// Number of committed read-write transactions
    pub fn revision(&self) -> u64 {
        self.cache.revision()
    }

    /// Cache counters
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of transactions currently open
    pub fn open_transactions(&self) -> usize {
        self.store.open_transactions()
    }

    /// Roll back open transactions and close every layer. Idempotent.
    pub fn close(&self) {
        self.store.close();
    }

    /// Whether [`Repository::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("store", &self.store)
            .field("cache", &self.cache)
            .finish()
    }
}
