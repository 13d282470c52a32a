//! Storage layer for kstore
//!
//! This crate implements the store decorators and a reference backend:
//! - SynchronizedStore: admission control and lifecycle enforcement, forced
//!   rollback and stream closing
//! - CachingStore: two-level transactional cache with revision-gated coherence
//!   and write buffering
//! - LoggingStore: per-call DEBUG logging with timings
//! - MemoryStore: in-memory copy-on-write backend
//!
//! Decorators compose around any [`kstore_core::Store`]. The usual stack is
//! `SynchronizedStore → CachingStore → backend`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod caching;
pub mod logging;
pub mod memory;
pub mod synchronized;

pub use caching::{
    CacheConfig, CacheStats, CachingStore, CachingTransaction, DEFAULT_MAX_BUFFERED_CHANGES,
    DEFAULT_MAX_CHANGES, DEFAULT_MAX_SIZE,
};
pub use logging::{LoggingStore, LoggingTransaction};
pub use memory::{MemoryStore, MemoryTransaction};
pub use synchronized::{SynchronizedStore, SynchronizedTransaction};
