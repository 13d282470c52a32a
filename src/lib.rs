//! # kstore
//!
//! Transactional data-access layer for a semantic data repository.
//!
//! kstore sits between a request API and a pluggable record backend, and adds:
//!
//! - **Admission control**: a semaphore-based [`Synchronizer`] bounding
//!   concurrent transactions and enforcing a write policy (`"N"`, `"N:K"`,
//!   `"N:WX"`, `"N:CX"`)
//! - **Lifecycle enforcement**: [`SynchronizedStore`] rejects calls after
//!   close or end, rolls back transactions left open at close, and closes
//!   every stream a transaction returned when it ends
//! - **Caching**: [`CachingStore`] keeps a shared per-type LRU cache coherent
//!   with a revision counter, plus a per-transaction cache and write buffer
//!
//! ## Quick Start
//!
//! ```ignore
//! use kstore::prelude::*;
//!
//! let repo = Repository::builder()
//!     .memory()
//!     .synchronizer("8:CX")
//!     .open()?;
//!
//! repo.write(|tx| {
//!     tx.store(RecordType::Entity, Record::new("ex:alice").with(Uri::new("rdfs:label"), "Alice"))
//! })?;
//!
//! let mut tx = repo.begin(true)?;
//! let alice = tx.lookup(RecordType::Entity, &[Uri::new("ex:alice")], None)?.to_vec()?;
//! tx.end(false)?;
//!
//! repo.close();
//! ```

#![warn(missing_docs)]

mod builder;
mod config;
mod repository;

pub mod prelude;

// Re-export main entry points
pub use builder::StoreBuilder;
pub use config::{ConfigError, StoreConfig, DEFAULT_SYNCHRONIZER};
pub use repository::Repository;

// Re-export layer crates
pub use kstore_concurrency::{Interrupt, Synchronizer, SynchronizerSpec, WritePolicy};
pub use kstore_core::{
    Condition, Error, ForwardingTransaction, MatchConditions, MatchIds, MatchProperties,
    Operation, Record, RecordStream, RecordType, Result, Store, StreamCloser, Transaction,
    TypeMap, Uri, Value,
};
pub use kstore_storage::{
    CacheConfig, CacheStats, CachingStore, LoggingStore, MemoryStore, SynchronizedStore,
};

/// Admission control
pub use kstore_concurrency as concurrency;
/// Store decorators and backends
pub use kstore_storage as storage;
