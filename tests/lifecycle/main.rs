//! Lifecycle enforcement
//!
//! Store and transaction state machines, forced rollback at close, and
//! closing of streams left open by callers.

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use common::*;
use kstore::{MatchConditions, MatchIds, MatchProperties, Store, SynchronizedStore};

fn guarded(spec: &str) -> (Arc<Recorder>, RecordingStore, SynchronizedStore) {
    init_tracing();
    let backend = RecordingStore::new();
    let recorder = Arc::clone(&backend.recorder);
    let store = SynchronizedStore::with_spec(Box::new(backend.clone()), spec).unwrap();
    store.init().unwrap();
    (recorder, backend, store)
}

// =============================================================================
// Store state machine
// =============================================================================

#[test]
fn store_moves_from_new_to_initialized_to_closed() {
    let store = SynchronizedStore::with_spec(Box::new(RecordingStore::new()), "2:1").unwrap();
    assert!(store.begin(true).unwrap_err().is_illegal_state());

    store.init().unwrap();
    assert!(store.init().unwrap_err().is_illegal_state());
    store.begin(true).unwrap().end(false).unwrap();

    store.close();
    assert!(store.begin(true).unwrap_err().is_illegal_state());
    assert!(store.init().unwrap_err().is_illegal_state());
}

#[test]
fn close_is_idempotent() {
    let (recorder, _backend, store) = guarded("2:1");
    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:a", "A")).unwrap();

    store.close();
    store.close();
    assert_eq!(Recorder::get(&recorder.rollbacks), 1);
    assert_eq!(Recorder::get(&recorder.commits), 0);
}

#[test]
fn close_before_init_is_allowed() {
    let store = SynchronizedStore::with_spec(Box::new(RecordingStore::new()), "1").unwrap();
    store.close();
    assert!(store.is_closed());
}

// =============================================================================
// Transaction state machine
// =============================================================================

#[test]
fn end_twice_has_no_effect() {
    let (recorder, backend, store) = guarded("2:1");
    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:a", "A")).unwrap();
    tx.end(true).unwrap();
    tx.end(true).unwrap();
    tx.end(false).unwrap();

    assert_eq!(Recorder::get(&recorder.commits), 1);
    assert_eq!(Recorder::get(&recorder.rollbacks), 0);
    assert_eq!(backend.inner.revision(), 1);
    assert_eq!(store.synchronizer().available_permits(), 2);
}

#[test]
fn calls_after_end_fail() {
    let (_recorder, _backend, store) = guarded("2:1");
    let mut tx = store.begin(false).unwrap();
    tx.end(false).unwrap();

    assert!(tx.lookup(TY, &[uri("ks:a")], None).unwrap_err().is_illegal_state());
    assert!(tx.retrieve(TY, None, None).unwrap_err().is_illegal_state());
    assert!(tx.count(TY, None).unwrap_err().is_illegal_state());
    assert!(tx.store(TY, entity("ks:a", "A")).unwrap_err().is_illegal_state());
    assert!(tx.delete(TY, &uri("ks:a")).unwrap_err().is_illegal_state());
}

#[test]
fn writes_on_read_only_transaction_fail() {
    let (recorder, _backend, store) = guarded("2:1");
    let mut tx = store.begin(true).unwrap();
    assert!(tx.store(TY, entity("ks:a", "A")).unwrap_err().is_illegal_state());
    assert!(tx.delete(TY, &uri("ks:a")).unwrap_err().is_illegal_state());
    assert_eq!(Recorder::get(&recorder.stores), 0);
    tx.end(false).unwrap();
}

#[test]
fn failed_backend_begin_releases_admission_slot() {
    let (_recorder, backend, store) = guarded("1:1");
    backend.inner.close();

    assert!(store.begin(false).is_err());
    assert!(store.begin(true).is_err());
    assert_eq!(store.synchronizer().available_permits(), 1);
    assert_eq!(store.open_transactions(), 0);
}

#[test]
fn failed_commit_still_ends_transaction() {
    let (recorder, _backend, store) = guarded("1:1");
    let mut tx = store.begin(false).unwrap();
    tx.store(TY, entity("ks:a", "A")).unwrap();

    recorder.fail_commit.store(true, Ordering::SeqCst);
    assert!(tx.end(true).unwrap_err().is_io());
    assert!(tx.count(TY, None).unwrap_err().is_illegal_state());

    // The slot is free again
    recorder.fail_commit.store(false, Ordering::SeqCst);
    store.begin(false).unwrap().end(false).unwrap();
}

#[test]
fn dropped_transaction_is_rolled_back() {
    let (recorder, backend, store) = guarded("1:1");
    {
        let mut tx = store.begin(false).unwrap();
        tx.store(TY, entity("ks:a", "A")).unwrap();
    }
    assert_eq!(Recorder::get(&recorder.rollbacks), 1);
    assert!(backend.inner.is_empty());
    assert_eq!(store.open_transactions(), 0);
    assert_eq!(store.synchronizer().available_permits(), 1);
}

// =============================================================================
// Forced rollback at close
// =============================================================================

#[test]
fn close_rolls_back_transactions_of_other_threads() {
    let (recorder, backend, store) = guarded("4:2");
    let store = Arc::new(store);

    let mut writer = store.begin(false).unwrap();
    writer.store(TY, entity("ks:a", "A")).unwrap();
    let reader = store.begin(true).unwrap();

    let closer = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.close())
    };
    closer.join().unwrap();

    assert_eq!(Recorder::get(&recorder.rollbacks), 2);
    assert_eq!(store.open_transactions(), 0);
    assert!(backend.inner.is_empty());

    // The owner sees an ended transaction
    assert!(writer.store(TY, entity("ks:b", "B")).unwrap_err().is_illegal_state());
    writer.end(true).unwrap();
    drop(reader);
    assert_eq!(Recorder::get(&recorder.commits), 0);
}

#[test]
fn rollback_failures_at_close_are_swallowed() {
    let (recorder, _backend, store) = guarded("3:1");
    let _a = store.begin(false).unwrap();
    let _b = store.begin(true).unwrap();
    recorder.fail_rollback.store(true, Ordering::SeqCst);

    store.close();
    assert!(store.is_closed());
    assert_eq!(Recorder::get(&recorder.rollbacks), 2);
    assert_eq!(store.open_transactions(), 0);
}

// =============================================================================
// Leaked streams
// =============================================================================

#[test]
fn end_closes_every_open_stream() {
    let (recorder, _backend, store) = guarded("2:1");
    seed(&store, &[entity("ks:a", "A"), entity("ks:b", "B")]);

    let mut tx = store.begin(true).unwrap();
    let lookup = tx.lookup(TY, &[uri("ks:a"), uri("ks:b")], None).unwrap();
    let mut retrieve = tx.retrieve(TY, None, None).unwrap();
    let _first = retrieve.next();
    let consumed = tx.retrieve(TY, None, None).unwrap().to_vec().unwrap();
    assert_eq!(consumed.len(), 2);
    assert_eq!(recorder.open_streams(), 2);

    tx.end(false).unwrap();
    assert_eq!(recorder.open_streams(), 0);
    assert!(lookup.is_closed());
    assert!(retrieve.is_closed());
    assert!(retrieve.next().is_none());
}

#[test]
fn close_closes_streams_of_open_transactions() {
    let (recorder, _backend, store) = guarded("2:1");
    seed(&store, &[entity("ks:a", "A")]);

    let mut tx = store.begin(true).unwrap();
    let ids: MatchIds = [(TY, vec![uri("ks:a")])].into_iter().collect();
    let stream = tx
        .match_records(&MatchConditions::new(), &ids, &MatchProperties::new())
        .unwrap();
    assert_eq!(recorder.open_streams(), 1);

    store.close();
    assert!(stream.is_closed());
    assert_eq!(recorder.open_streams(), 0);
}

#[test]
fn transaction_ended_by_close_rejects_queries() {
    let (_recorder, _backend, store) = guarded("2:1");
    let mut tx = store.begin(true).unwrap();
    store.close();
    // The transaction ended underneath its owner
    assert!(tx.retrieve(TY, None, None).is_err());
}
