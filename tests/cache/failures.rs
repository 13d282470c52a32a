//! Backend failures during flush and commit

use std::sync::atomic::Ordering;

use kstore::storage::CacheConfig;
use kstore::{Store, SynchronizedStore};

use crate::common::*;

#[test]
fn failed_flush_keeps_unapplied_changes_buffered() {
    let (recorder, _backend, store) = caching(CacheConfig::default());
    let mut tx = store.begin(false).unwrap();
    for id in ["ks:a", "ks:b", "ks:c"] {
        tx.store(TY, entity(id, "x")).unwrap();
    }

    recorder.fail_writes_after(1);
    assert!(tx.count(TY, None).unwrap_err().is_io());
    assert_eq!(Recorder::get(&recorder.stores), 1);

    // Retrying pushes the rest, nothing is lost or written twice
    recorder.allow_writes();
    assert_eq!(tx.count(TY, None).unwrap(), 3);
    assert_eq!(Recorder::get(&recorder.stores), 3);
    tx.end(true).unwrap();
    assert_eq!(Recorder::get(&recorder.stores), 3);
}

#[test]
fn store_that_cannot_make_room_has_no_effect() {
    let config = CacheConfig {
        max_buffered_changes: 1,
        ..CacheConfig::default()
    };
    let (recorder, backend, store) = caching(config);
    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:a", "A")).unwrap();

    recorder.fail_writes_after(0);
    assert!(tx.store(TY, entity("ks:b", "B")).is_err());
    assert_eq!(lookup_label(tx.as_mut(), "ks:b"), None);
    assert_eq!(lookup_label(tx.as_mut(), "ks:a").as_deref(), Some("A"));

    recorder.allow_writes();
    tx.end(true).unwrap();
    assert_eq!(backend.inner.len(TY), 1);
}

#[test]
fn flush_failure_at_commit_rolls_back() {
    let (recorder, backend, store) = caching(CacheConfig::default());
    seed(&store, &[entity("ks:a", "A")]);
    let cached = store.cached(TY);

    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:a", "A2")).unwrap();
    recorder.fail_writes_after(0);

    assert!(tx.end(true).unwrap_err().is_io());
    assert_eq!(Recorder::get(&recorder.rollbacks), 1);
    assert_eq!(store.revision(), 1);
    assert_eq!(store.cached(TY), cached);
    assert_eq!(backend.inner.revision(), 1);

    // Ended even though the commit failed
    assert!(tx.count(TY, None).unwrap_err().is_illegal_state());
    tx.end(true).unwrap();
}

#[test]
fn backend_commit_failure_leaves_cache_and_revision_unchanged() {
    let (recorder, _backend, store) = caching(CacheConfig::default());
    seed(&store, &[entity("ks:x", "v1")]);

    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:x", "v2")).unwrap();
    recorder.fail_commit.store(true, Ordering::SeqCst);
    assert!(tx.end(true).is_err());
    recorder.fail_commit.store(false, Ordering::SeqCst);

    assert_eq!(store.revision(), 1);
    let mut reader = store.begin(true).unwrap();
    assert_eq!(lookup_label(reader.as_mut(), "ks:x").as_deref(), Some("v1"));
    reader.end(false).unwrap();
    assert_eq!(store.stats().global_hits, 1);
}

#[test]
fn rollback_discards_flushed_changes() {
    let config = CacheConfig {
        max_buffered_changes: 0,
        ..CacheConfig::default()
    };
    let (recorder, backend, store) = caching(config);
    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:a", "A")).unwrap();
    assert_eq!(Recorder::get(&recorder.stores), 1);

    tx.end(false).unwrap();
    assert_eq!(store.revision(), 0);
    assert!(backend.inner.is_empty());

    let mut reader = store.begin(true).unwrap();
    assert_eq!(lookup_label(reader.as_mut(), "ks:a"), None);
    reader.end(false).unwrap();
}

#[test]
fn corruption_passes_through_cache_and_guard_unchanged() {
    let (recorder, backend, cache) = caching(CacheConfig::default());
    seed(&cache, &[entity("ks:a", "A")]);
    let store = SynchronizedStore::with_spec(Box::new(cache), "2:1").unwrap();
    store.init().unwrap();
    recorder.corrupt.store(true, Ordering::SeqCst);

    // During a flush
    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:b", "B")).unwrap();
    recorder.fail_writes_after(0);
    assert!(tx.count(TY, None).unwrap_err().is_corruption());
    recorder.allow_writes();
    tx.end(false).unwrap();

    // During the backend commit
    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:a", "A2")).unwrap();
    recorder.fail_commit.store(true, Ordering::SeqCst);
    let err = tx.end(true).unwrap_err();
    assert!(err.is_corruption());
    assert!(!err.is_io());
    recorder.fail_commit.store(false, Ordering::SeqCst);

    assert_eq!(store.open_transactions(), 0);
    assert_eq!(store.synchronizer().available_permits(), 2);
    assert_eq!(backend.inner.len(TY), 1);
    store.close();
}
