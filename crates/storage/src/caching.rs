//! Two-level transactional cache
//!
//! [`CachingStore`] keeps a bounded LRU cache per record type shared by every
//! transaction (the global level) and an unbounded map per transaction (the
//! local level). The local level merges what the transaction has read with
//! what it has written, including negative entries for ids known to be absent.
//!
//! ## Coherence
//!
//! A revision counter and the global caches sit behind one reader/writer lock.
//! Each transaction snapshots the revision when it begins and trusts the global
//! level only while:
//! - the live revision still equals its snapshot, and
//! - it has not pushed buffered writes of that type to the backend.
//!
//! A stale snapshot only costs a cache miss. The write lock is taken once per
//! committed read-write transaction, to commit the backend, bump the revision
//! and reconcile the global caches as a unit.
//!
//! ## Write buffering
//!
//! Writes land in the local cache at once (read-your-writes) and in a per-type
//! change buffer that is pushed to the backend when it is full, before any
//! full-table read of that type, and at commit. Ids touched by writes are
//! tracked for eviction at commit; past `max_changes` distinct ids tracking is
//! abandoned and the whole type is evicted instead.
//!
//! Changes pushed to the backend belong to the backend transaction: if the
//! transaction later rolls back, discarding them is the backend's job.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kstore_core::{
    Condition, Error, MatchConditions, MatchIds, MatchProperties, Record, RecordStream,
    RecordType, Result, Store, Transaction, TypeMap, Uri,
};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, info};

/// Default capacity of each global per-type cache
pub const DEFAULT_MAX_SIZE: usize = 1024;
/// Default number of distinct ids tracked per type before invalidation is abandoned
pub const DEFAULT_MAX_CHANGES: usize = 1024;
/// Default number of buffered changes per type before they are pushed to the backend
pub const DEFAULT_MAX_BUFFERED_CHANGES: usize = 1024;

/// Sizing of a [`CachingStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Capacity of each global per-type cache
    pub max_size: usize,
    /// Distinct written ids tracked per type and transaction
    pub max_changes: usize,
    /// Buffered changes per type and transaction; 0 writes through
    pub max_buffered_changes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_changes: DEFAULT_MAX_CHANGES,
            max_buffered_changes: DEFAULT_MAX_BUFFERED_CHANGES,
        }
    }
}

/// Snapshot of the cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Ids served from a transaction's local cache
    pub local_hits: u64,
    /// Ids served from the global cache
    pub global_hits: u64,
    /// Ids fetched from the backend
    pub fetches: u64,
    /// Stores and deletes registered
    pub changes: u64,
    /// Non-empty buffer flushes
    pub flushes: u64,
    /// Current revision
    pub revision: u64,
}

#[derive(Debug, Default)]
struct Counters {
    local_hits: AtomicU64,
    global_hits: AtomicU64,
    fetches: AtomicU64,
    changes: AtomicU64,
    flushes: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}

type GlobalCache = LruCache<Uri, Arc<Record>>;

/// Revision and global caches, linearized by one lock
struct GlobalState {
    revision: u64,
    /// Per-type mutex so that LRU bookkeeping can run under the read lock
    caches: TypeMap<Mutex<GlobalCache>>,
}

struct CacheShared {
    delegate: Box<dyn Store>,
    config: CacheConfig,
    global: RwLock<GlobalState>,
    counters: Counters,
}

/// A [`Store`] wrapper caching point lookups and buffering writes.
///
/// # Stacking with [`SynchronizedStore`](crate::SynchronizedStore)
///
/// Put the cache *inside* the synchronized store. A commit holds the global
/// write lock while the delegate commits, and under a `CX` policy a delegate
/// that is a synchronized store waits in that call for every other
/// transaction to end. Those transactions need the read lock for their
/// lookups, so with the cache outside the two wait on each other forever.
/// Other policies work in either order.
pub struct CachingStore {
    shared: Arc<CacheShared>,
}

impl CachingStore {
    /// Wrap `delegate` with default sizing
    pub fn new(delegate: Box<dyn Store>) -> Result<Self> {
        Self::with_config(delegate, CacheConfig::default())
    }

    /// Wrap `delegate` with explicit sizing
    pub fn with_config(delegate: Box<dyn Store>, config: CacheConfig) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.max_size)
            .ok_or_else(|| Error::invalid_argument("cache max_size must be positive"))?;
        if config.max_changes == 0 {
            return Err(Error::invalid_argument("cache max_changes must be positive"));
        }

        info!(
            max_size = config.max_size,
            max_changes = config.max_changes,
            max_buffered_changes = config.max_buffered_changes,
            "caching store configured"
        );

        Ok(Self {
            shared: Arc::new(CacheShared {
                delegate,
                config,
                global: RwLock::new(GlobalState {
                    revision: 0,
                    caches: TypeMap::from_fn(|_| Mutex::new(LruCache::new(capacity))),
                }),
                counters: Counters::default(),
            }),
        })
    }

    /// Sizing in effect
    pub fn config(&self) -> CacheConfig {
        self.shared.config
    }

    /// Number of read-write transactions committed through this store
    pub fn revision(&self) -> u64 {
        self.shared.global.read().revision
    }

    /// Number of records of type `ty` in the global cache
    pub fn cached(&self, ty: RecordType) -> usize {
        self.shared.global.read().caches[ty].lock().len()
    }

    /// Current counter values
    pub fn stats(&self) -> CacheStats {
        let c = &self.shared.counters;
        CacheStats {
            local_hits: c.local_hits.load(Ordering::Relaxed),
            global_hits: c.global_hits.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            changes: c.changes.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            revision: self.revision(),
        }
    }
}

impl Store for CachingStore {
    fn init(&self) -> Result<()> {
        self.shared.delegate.init()
    }

    fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>> {
        // The snapshot may only be older than the backend transaction, which
        // at worst disables the global cache for it. Calling the delegate
        // outside the lock keeps a blocking delegate begin from stalling commits.
        let revision = self.shared.global.read().revision;
        let delegate = self.shared.delegate.begin(read_only)?;
        Ok(Box::new(CachingTransaction {
            shared: Arc::clone(&self.shared),
            delegate,
            revision,
            local: TypeMap::default(),
            write: (!read_only).then(WriteState::default),
            ended: false,
        }))
    }

    fn close(&self) {
        let stats = self.stats();
        info!(
            local_hits = stats.local_hits,
            global_hits = stats.global_hits,
            fetches = stats.fetches,
            changes = stats.changes,
            flushes = stats.flushes,
            revision = stats.revision,
            "caching store closed"
        );
        self.shared.delegate.close();
    }
}

impl fmt::Debug for CachingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingStore")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// Pending change: `None` deletes the id
type Change = Option<Arc<Record>>;

#[derive(Debug)]
enum InvalidationSet {
    Tracking(FxHashSet<Uri>),
    /// Too many ids: evict the whole type at commit
    Abandoned,
}

impl Default for InvalidationSet {
    fn default() -> Self {
        InvalidationSet::Tracking(FxHashSet::default())
    }
}

#[derive(Debug, Default)]
struct WriteState {
    /// Types whose changes already reached the backend
    dirty: TypeMap<bool>,
    changes: TypeMap<FxHashMap<Uri, Change>>,
    invalidated: TypeMap<InvalidationSet>,
}

/// Transaction handle returned by [`CachingStore::begin`].
pub struct CachingTransaction {
    shared: Arc<CacheShared>,
    delegate: Box<dyn Transaction>,
    revision: u64,
    /// Known content by id; `None` marks a confirmed absence or a delete
    local: TypeMap<FxHashMap<Uri, Change>>,
    write: Option<WriteState>,
    ended: bool,
}

impl CachingTransaction {
    fn check_active(&self) -> Result<()> {
        if self.ended {
            return Err(Error::illegal_state("transaction already ended"));
        }
        Ok(())
    }

    fn is_dirty(&self, ty: RecordType) -> bool {
        self.write.as_ref().map_or(false, |w| w.dirty[ty])
    }

    /// Serve `missing` ids from the global cache, if it can be trusted.
    /// Returns whether it was trusted.
    fn consult_global(&mut self, ty: RecordType, missing: &mut Vec<Uri>) -> bool {
        if self.is_dirty(ty) {
            return false;
        }
        let global = self.shared.global.read();
        if global.revision != self.revision {
            return false;
        }
        let mut cache = global.caches[ty].lock();
        let local = &mut self.local[ty];
        let before = missing.len();
        missing.retain(|id| match cache.get(id) {
            Some(record) => {
                local.insert(id.clone(), Some(Arc::clone(record)));
                false
            }
            None => true,
        });
        Counters::add(&self.shared.counters.global_hits, before - missing.len());
        true
    }

    /// Fetch `missing` ids from the backend into the local cache
    fn fetch(&mut self, ty: RecordType, missing: Vec<Uri>, publish: bool) -> Result<()> {
        Counters::add(&self.shared.counters.fetches, missing.len());
        let fetched = self.delegate.lookup(ty, &missing, None)?.to_vec()?;

        let local = &mut self.local[ty];
        let mut fresh = Vec::with_capacity(fetched.len());
        for record in fetched {
            let record = Arc::new(record);
            local.insert(record.id().clone(), Some(Arc::clone(&record)));
            fresh.push(record);
        }
        for id in missing {
            local.entry(id).or_insert(None);
        }

        if publish && !fresh.is_empty() {
            let global = self.shared.global.read();
            if global.revision == self.revision {
                let mut cache = global.caches[ty].lock();
                for record in fresh {
                    cache.put(record.id().clone(), record);
                }
            }
        }
        Ok(())
    }

    /// Push the buffered changes of `ty` to the backend.
    ///
    /// On failure the failed change and every change not yet attempted stay
    /// buffered; changes already applied stay applied.
    fn flush(&mut self, ty: RecordType) -> Result<()> {
        let Some(write) = self.write.as_mut() else {
            return Ok(());
        };
        if write.changes[ty].is_empty() {
            return Ok(());
        }

        write.dirty[ty] = true;
        let pending = std::mem::take(&mut write.changes[ty]);
        debug!(ty = %ty, changes = pending.len(), "flushing buffered changes");
        self.shared.counters.flushes.fetch_add(1, Ordering::Relaxed);

        let mut pending = pending.into_iter();
        while let Some((id, change)) = pending.next() {
            let result = match &change {
                Some(record) => self.delegate.store(ty, Record::clone(record)),
                None => self.delegate.delete(ty, &id),
            };
            if let Err(e) = result {
                let buffer = &mut write.changes[ty];
                buffer.insert(id, change);
                buffer.extend(pending);
                return Err(e);
            }
        }
        Ok(())
    }

    fn flush_all(&mut self) -> Result<()> {
        for ty in RecordType::ALL {
            self.flush(ty)?;
        }
        Ok(())
    }

    fn register_change(&mut self, ty: RecordType, id: Uri, change: Change) -> Result<()> {
        self.check_active()?;
        let config = self.shared.config;
        let write = self
            .write
            .as_mut()
            .ok_or_else(|| Error::illegal_state("transaction is read-only"))?;

        if let InvalidationSet::Tracking(ids) = &mut write.invalidated[ty] {
            ids.insert(id.clone());
            if ids.len() > config.max_changes {
                debug!(ty = %ty, max_changes = config.max_changes, "abandoning invalidation tracking");
                write.invalidated[ty] = InvalidationSet::Abandoned;
            }
        }

        let buffer = &write.changes[ty];
        let full = !buffer.is_empty()
            && !buffer.contains_key(&id)
            && buffer.len() >= config.max_buffered_changes;
        if full {
            self.flush(ty)?;
        }

        self.shared.counters.changes.fetch_add(1, Ordering::Relaxed);
        self.local[ty].insert(id.clone(), change.clone());
        if let Some(write) = self.write.as_mut() {
            write.changes[ty].insert(id, change);
        }
        if config.max_buffered_changes == 0 {
            self.flush(ty)?;
        }
        Ok(())
    }

    /// Commit a read-write transaction and reconcile the global caches
    fn commit(&mut self) -> Result<()> {
        if let Err(e) = self.flush_all() {
            if let Err(rollback) = self.delegate.end(false) {
                error!(error = %rollback, "rollback after failed flush also failed");
            }
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        let mut global = shared.global.write();
        self.delegate.end(true)?;

        // Entries read at our snapshot are only current if nobody else
        // committed since; ids we wrote are current either way.
        let unchanged = global.revision == self.revision;
        global.revision += 1;
        let revision = global.revision;

        let Some(write) = self.write.as_ref() else {
            return Ok(());
        };
        for ty in RecordType::ALL {
            let cache = global.caches[ty].get_mut();
            match &write.invalidated[ty] {
                InvalidationSet::Abandoned => cache.clear(),
                InvalidationSet::Tracking(written) => {
                    for id in written {
                        cache.pop(id);
                    }
                    for (id, entry) in &self.local[ty] {
                        if let Some(record) = entry {
                            if unchanged || written.contains(id) {
                                cache.put(id.clone(), Arc::clone(record));
                            }
                        }
                    }
                }
            }
        }
        debug!(revision, "committed and reconciled global caches");
        Ok(())
    }
}

fn project(record: &Record, properties: Option<&[Uri]>) -> Record {
    match properties {
        Some(properties) => record.projected(properties),
        None => record.clone(),
    }
}

impl Transaction for CachingTransaction {
    fn lookup(
        &mut self,
        ty: RecordType,
        ids: &[Uri],
        properties: Option<&[Uri]>,
    ) -> Result<RecordStream> {
        self.check_active()?;

        let mut seen = FxHashSet::default();
        let requested: Vec<&Uri> = ids.iter().filter(|id| seen.insert(*id)).collect();

        let local = &self.local[ty];
        let mut missing: Vec<Uri> = requested
            .iter()
            .filter(|id| !local.contains_key(**id))
            .map(|id| (*id).clone())
            .collect();
        Counters::add(
            &self.shared.counters.local_hits,
            requested.len() - missing.len(),
        );

        if !missing.is_empty() {
            let trusted = self.consult_global(ty, &mut missing);
            if !missing.is_empty() {
                self.fetch(ty, missing, trusted)?;
            }
        }

        let local = &self.local[ty];
        let records = requested
            .into_iter()
            .filter_map(|id| local.get(id).and_then(Option::as_ref))
            .map(|record| project(record, properties))
            .collect();
        Ok(RecordStream::from_vec(records))
    }

    fn retrieve(
        &mut self,
        ty: RecordType,
        condition: Option<&Condition>,
        properties: Option<&[Uri]>,
    ) -> Result<RecordStream> {
        self.check_active()?;
        self.flush(ty)?;
        self.delegate.retrieve(ty, condition, properties)
    }

    fn count(&mut self, ty: RecordType, condition: Option<&Condition>) -> Result<u64> {
        self.check_active()?;
        self.flush(ty)?;
        self.delegate.count(ty, condition)
    }

    fn match_records(
        &mut self,
        conditions: &MatchConditions,
        ids: &MatchIds,
        properties: &MatchProperties,
    ) -> Result<RecordStream> {
        self.check_active()?;
        self.flush_all()?;
        self.delegate.match_records(conditions, ids, properties)
    }

    fn store(&mut self, ty: RecordType, record: Record) -> Result<()> {
        let id = record.id().clone();
        self.register_change(ty, id, Some(Arc::new(record)))
    }

    fn delete(&mut self, ty: RecordType, id: &Uri) -> Result<()> {
        self.register_change(ty, id.clone(), None)
    }

    fn end(&mut self, commit: bool) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;

        let result = if commit && self.write.is_some() {
            self.commit()
        } else {
            self.delegate.end(commit)
        };

        self.local = TypeMap::default();
        self.write = None;
        result
    }
}

impl fmt::Debug for CachingTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingTransaction")
            .field("revision", &self.revision)
            .field("read_only", &self.write.is_none())
            .field("ended", &self.ended)
            .finish()
    }
}
