//! Coherence, isolation and dedup across transactions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use kstore::storage::CacheConfig;
use kstore::{CachingStore, Record, RecordType, Repository, Store, SynchronizedStore};

use crate::common::*;

#[test]
fn committed_write_is_visible_to_later_snapshots() {
    let (_recorder, _backend, store) = caching(CacheConfig::default());
    seed(&store, &[entity("ks:x", "v1")]);

    // Warm the global cache with v1
    let mut reader = store.begin(true).unwrap();
    assert_eq!(lookup_label(reader.as_mut(), "ks:x").as_deref(), Some("v1"));
    reader.end(false).unwrap();

    let mut writer = store.begin(false).unwrap();
    writer.store(TY, entity("ks:x", "v2")).unwrap();
    writer.end(true).unwrap();

    let mut reader = store.begin(true).unwrap();
    assert_eq!(lookup_label(reader.as_mut(), "ks:x").as_deref(), Some("v2"));
    reader.end(false).unwrap();
}

#[test]
fn committed_delete_is_visible_to_later_snapshots() {
    let (_recorder, _backend, store) = caching(CacheConfig::default());
    seed(&store, &[entity("ks:x", "v1")]);

    let mut writer = store.begin(false).unwrap();
    writer.delete(TY, &uri("ks:x")).unwrap();
    writer.end(true).unwrap();

    let mut reader = store.begin(true).unwrap();
    assert_eq!(lookup_label(reader.as_mut(), "ks:x"), None);
    reader.end(false).unwrap();
    assert_eq!(store.cached(TY), 0);
}

#[test]
fn uncommitted_write_is_invisible_to_readers() {
    let (_recorder, _backend, store) = caching(CacheConfig::default());
    seed(&store, &[entity("ks:x", "v1")]);

    let mut writer = store.begin(false).unwrap();
    writer.store(TY, entity("ks:x", "dirty")).unwrap();
    writer.store(TY, entity("ks:y", "dirty")).unwrap();
    // Push the buffer into the backend transaction
    writer.count(TY, None).unwrap();

    let mut reader = store.begin(true).unwrap();
    assert_eq!(lookup_label(reader.as_mut(), "ks:x").as_deref(), Some("v1"));
    assert_eq!(lookup_label(reader.as_mut(), "ks:y"), None);
    reader.end(false).unwrap();

    writer.end(false).unwrap();
    let mut reader = store.begin(true).unwrap();
    assert_eq!(lookup_label(reader.as_mut(), "ks:x").as_deref(), Some("v1"));
    reader.end(false).unwrap();
    assert_eq!(store.revision(), 1);
}

#[test]
fn writes_are_read_back_before_flush_or_commit() {
    let (recorder, _backend, store) = caching(CacheConfig::default());
    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:x", "mine")).unwrap();
    assert_eq!(lookup_label(tx.as_mut(), "ks:x").as_deref(), Some("mine"));
    assert_eq!(Recorder::get(&recorder.stores), 0);
    assert_eq!(Recorder::get(&recorder.fetched_ids), 0);
    tx.end(true).unwrap();
    assert_eq!(Recorder::get(&recorder.stores), 1);
}

#[test]
fn missing_id_is_fetched_once_per_transaction() {
    let (recorder, _backend, store) = caching(CacheConfig::default());
    let mut tx = store.begin(true).unwrap();
    for _ in 0..3 {
        assert_eq!(lookup_label(tx.as_mut(), "ks:ghost"), None);
    }
    assert_eq!(Recorder::get(&recorder.fetched_ids), 1);
    tx.end(false).unwrap();
}

#[test]
fn lookup_batches_backend_fetches() {
    let (recorder, _backend, store) = caching(CacheConfig::default());
    seed(&store, &[entity("ks:a", "A"), entity("ks:b", "B")]);

    let mut tx = store.begin(true).unwrap();
    let ids = [uri("ks:a"), uri("ks:b"), uri("ks:c"), uri("ks:a")];
    let records = tx.lookup(TY, &ids, None).unwrap().to_vec().unwrap();
    let labels: Vec<_> = records.iter().filter_map(label_of).collect();
    assert_eq!(labels, ["A", "B"]);
    tx.end(false).unwrap();

    // Committed ids were published at commit; only the unknown one is fetched
    assert_eq!(Recorder::get(&recorder.fetched_ids), 1);
    assert_eq!(recorder.open_streams(), 0);
}

#[test]
fn reads_are_published_for_later_transactions() {
    let (recorder, backend, store) = caching(CacheConfig::default());
    // Committed behind the cache's back, so the cache starts cold
    seed(&backend, &[entity("ks:a", "A")]);

    for _ in 0..3 {
        let mut tx = store.begin(true).unwrap();
        assert_eq!(lookup_label(tx.as_mut(), "ks:a").as_deref(), Some("A"));
        tx.end(false).unwrap();
    }
    assert_eq!(Recorder::get(&recorder.fetched_ids), 1);
    assert_eq!(store.stats().global_hits, 2);
}

#[test]
fn read_only_entries_are_not_published_by_stale_commits() {
    let (_recorder, backend, store) = caching(CacheConfig::default());
    seed(&backend, &[entity("ks:a", "old"), entity("ks:b", "B")]);

    // Reads ks:a at revision 0, commits later
    let mut slow = store.begin(false).unwrap();
    assert_eq!(lookup_label(slow.as_mut(), "ks:a").as_deref(), Some("old"));

    // Invalidates the global entry and moves to revision 1
    let mut fast = store.begin(false).unwrap();
    fast.store(TY, entity("ks:a", "new")).unwrap();
    fast.end(true).unwrap();

    slow.store(RecordType::Resource, Record::new("ks:r")).unwrap();
    // The backend rejects the overlapping commit; either way no stale copy may leak
    let _ = slow.end(true);

    let mut reader = store.begin(true).unwrap();
    assert_eq!(lookup_label(reader.as_mut(), "ks:a").as_deref(), Some("new"));
    reader.end(false).unwrap();
}

#[test]
fn own_reads_are_published_when_no_one_else_committed() {
    let (_recorder, backend, store) = caching(CacheConfig::default());
    seed(&backend, &[entity("ks:a", "A")]);

    let mut tx = store.begin(false).unwrap();
    assert_eq!(lookup_label(tx.as_mut(), "ks:a").as_deref(), Some("A"));
    tx.store(TY, entity("ks:b", "B")).unwrap();
    tx.end(true).unwrap();

    assert_eq!(store.cached(TY), 2);
}

#[test]
fn concurrent_readers_never_see_stale_values() {
    const WRITES: usize = 50;

    let repo = Arc::new(
        Repository::builder()
            .memory()
            .synchronizer("8:1")
            .max_size(4)
            .open()
            .unwrap(),
    );
    repo.write(|tx| tx.store(TY, entity("ks:counter", "0"))).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let repo = Arc::clone(&repo);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    // Never older than the revision observed before beginning
                    let before = repo.revision();
                    let seen: usize = repo
                        .read(|tx| Ok(lookup_label(tx, "ks:counter")))
                        .unwrap()
                        .and_then(|v| v.parse().ok())
                        .unwrap();
                    assert!(seen as u64 + 1 >= before);
                }
            })
        })
        .collect();

    for n in 1..=WRITES {
        repo.write(|tx| tx.store(TY, entity("ks:counter", &n.to_string())))
            .unwrap();
    }
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }

    let last = repo.read(|tx| Ok(lookup_label(tx, "ks:counter"))).unwrap();
    assert_eq!(last, Some(WRITES.to_string()));
    assert_eq!(repo.revision(), WRITES as u64 + 1);
    repo.close();
}

#[test]
fn guard_over_cache_and_cache_over_guard_agree() {
    // Recommended order
    let outer = SynchronizedStore::with_spec(
        Box::new(CachingStore::new(Box::new(RecordingStore::new())).unwrap()),
        "2:1",
    )
    .unwrap();
    // Reverse order
    let inner = CachingStore::new(Box::new(
        SynchronizedStore::with_spec(Box::new(RecordingStore::new()), "2:1").unwrap(),
    ))
    .unwrap();

    for store in [&outer as &dyn Store, &inner as &dyn Store] {
        store.init().unwrap();
        seed(store, &[entity("ks:a", "A")]);
        let mut tx = store.begin(true).unwrap();
        assert_eq!(lookup_label(tx.as_mut(), "ks:a").as_deref(), Some("A"));
        tx.end(false).unwrap();
        store.close();
    }
}
