//! Lifecycle-enforcing store wrapper
//!
//! [`SynchronizedStore`] wraps another [`Store`] and guarantees that:
//! - transactions start and commit according to a [`Synchronizer`];
//! - the store follows `new → initialized → closed`, and transactions follow
//!   `active → ended` ([`Error::IllegalState`] is returned otherwise);
//! - every stream a transaction returned and that is still open gets closed
//!   before the transaction ends;
//! - transactions still open when the store closes are rolled back;
//! - a transaction handle dropped without `end()` is rolled back.
//!
//! Cleanup failures during forced rollback are logged and never propagated,
//! so [`Store::close`] always completes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use kstore_concurrency::{Interrupt, Synchronizer};
use kstore_core::{
    Error, ForwardingTransaction, Operation, RecordStream, Result, Store, StreamCloser,
    Transaction,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

const NEW: u8 = 0;
const INITIALIZED: u8 = 1;
const CLOSED: u8 = 2;

/// A [`Store`] wrapper enforcing admission control and lifecycle rules.
pub struct SynchronizedStore {
    shared: Arc<Shared>,
}

struct Shared {
    delegate: Box<dyn Store>,
    synchronizer: Synchronizer,
    state: AtomicU8,
    /// Serializes state transitions with transaction registration
    lifecycle: Mutex<()>,
    transactions: Mutex<FxHashMap<u64, Arc<TxState>>>,
    next_tx_id: AtomicU64,
}

type StreamRegistry = Mutex<FxHashMap<u64, StreamCloser>>;

struct TxState {
    id: u64,
    read_only: bool,
    ended: AtomicBool,
    delegate: Mutex<Box<dyn Transaction>>,
    streams: Arc<StreamRegistry>,
    next_stream_id: AtomicU64,
}

impl SynchronizedStore {
    /// Wrap `delegate`, admitting transactions through `synchronizer`
    pub fn new(delegate: Box<dyn Store>, synchronizer: Synchronizer) -> Self {
        debug!(synchronizer = %synchronizer, "synchronized store configured");
        Self {
            shared: Arc::new(Shared {
                delegate,
                synchronizer,
                state: AtomicU8::new(NEW),
                lifecycle: Mutex::new(()),
                transactions: Mutex::new(FxHashMap::default()),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    /// Wrap `delegate` with a synchronizer built from a spec string such as `"8:CX"`
    pub fn with_spec(delegate: Box<dyn Store>, spec: &str) -> Result<Self> {
        let synchronizer: Synchronizer = spec.parse()?;
        Ok(Self::new(delegate, synchronizer))
    }

    /// The admission controller
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.shared.synchronizer
    }

    /// Number of transactions begun and not yet ended
    pub fn open_transactions(&self) -> usize {
        self.shared.transactions.lock().len()
    }

    /// Whether [`Store::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == CLOSED
    }

    /// Like [`Store::begin`], but the wait for admission fails with
    /// [`Error::Interrupted`] once `interrupt` is set. Nothing is left held
    /// or registered when that happens.
    pub fn begin_interruptible(
        &self,
        read_only: bool,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn Transaction>> {
        self.shared.check_state(INITIALIZED)?;
        self.shared
            .synchronizer
            .begin_transaction_interruptible(read_only, interrupt)?;
        self.shared.admitted(read_only)
    }
}

impl Shared {
    fn check_state(&self, expected: u8) -> Result<()> {
        let state = self.state.load(Ordering::Acquire);
        if state == expected {
            return Ok(());
        }
        Err(Error::illegal_state(match state {
            NEW => "store not initialized",
            INITIALIZED => "store already initialized",
            _ => "store already closed",
        }))
    }

    fn open_transaction(self: &Arc<Self>, read_only: bool) -> Result<SynchronizedTransaction> {
        let _lifecycle = self.lifecycle.lock();
        self.check_state(INITIALIZED)?;
        let delegate = self.delegate.begin(read_only)?;
        let tx = Arc::new(TxState {
            id: self.next_tx_id.fetch_add(1, Ordering::Relaxed),
            read_only,
            ended: AtomicBool::new(false),
            delegate: Mutex::new(delegate),
            streams: Arc::new(Mutex::new(FxHashMap::default())),
            next_stream_id: AtomicU64::new(0),
        });
        self.transactions.lock().insert(tx.id, Arc::clone(&tx));
        Ok(SynchronizedTransaction {
            store: Arc::clone(self),
            tx,
        })
    }

    /// Open the delegate transaction once admission succeeded, handing the
    /// permits back if that fails
    fn admitted(self: &Arc<Self>, read_only: bool) -> Result<Box<dyn Transaction>> {
        match self.open_transaction(read_only) {
            Ok(tx) => Ok(Box::new(tx)),
            Err(e) => {
                self.synchronizer.end_transaction(read_only);
                Err(e)
            }
        }
    }

    /// End `tx` exactly once, whoever calls first (owner, drop or close)
    fn end_transaction(&self, tx: &TxState, commit: bool) -> Result<()> {
        if tx
            .ended
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        tx.close_streams();

        // Only writer commits enter the commit window. A rollback forced by
        // close() would otherwise wait under CX for permits held by the
        // transactions it has yet to roll back.
        let result = if commit && !tx.read_only {
            self.commit_in_window(tx)
        } else {
            tx.delegate.lock().end(commit)
        };

        self.synchronizer.end_transaction(tx.read_only);
        self.transactions.lock().remove(&tx.id);
        result
    }

    fn commit_in_window(&self, tx: &TxState) -> Result<()> {
        if let Err(e) = self.synchronizer.begin_commit() {
            if let Err(rollback) = tx.delegate.lock().end(false) {
                error!(tx = tx.id, error = %rollback, "rollback failed after commit window was refused");
            }
            return Err(e);
        }
        let result = tx.delegate.lock().end(true);
        self.synchronizer.end_commit();
        result
    }
}

impl Store for SynchronizedStore {
    fn init(&self) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock();
        self.shared.check_state(NEW)?;
        self.shared.delegate.init()?;
        self.shared.state.store(INITIALIZED, Ordering::Release);
        Ok(())
    }

    fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>> {
        self.shared.check_state(INITIALIZED)?;
        self.shared.synchronizer.begin_transaction(read_only)?;
        self.shared.admitted(read_only)
    }

    fn close(&self) {
        {
            let _lifecycle = self.shared.lifecycle.lock();
            if self.shared.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
                return;
            }
        }

        let pending: Vec<Arc<TxState>> =
            self.shared.transactions.lock().values().cloned().collect();
        for tx in pending {
            warn!(tx = tx.id, "forcing rollback of transaction due to store closure");
            if let Err(e) = self.shared.end_transaction(&tx, false) {
                error!(tx = tx.id, error = %e, "failed to end transaction (rollback assumed)");
            }
        }

        self.shared.delegate.close();
    }
}

impl fmt::Debug for SynchronizedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedStore")
            .field("synchronizer", &self.shared.synchronizer.to_string())
            .field("state", &self.shared.state.load(Ordering::Relaxed))
            .finish()
    }
}

impl TxState {
    fn check_active(&self) -> Result<()> {
        if self.ended.load(Ordering::Acquire) {
            return Err(Error::illegal_state("transaction already ended"));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::illegal_state("transaction is read-only"));
        }
        Ok(())
    }

    /// Track `stream` so that it is closed when the transaction ends.
    /// The entry removes itself once the stream is closed.
    fn register(&self, stream: RecordStream) -> RecordStream {
        let key = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let registry: Weak<StreamRegistry> = Arc::downgrade(&self.streams);
        let stream = stream.on_close(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().remove(&key);
            }
        });

        let mut streams = self.streams.lock();
        if self.ended.load(Ordering::Acquire) {
            drop(streams);
            stream.close();
        } else if !stream.is_closed() {
            streams.insert(key, stream.closer());
        }
        stream
    }

    fn close_streams(&self) {
        let pending: Vec<StreamCloser> = self.streams.lock().drain().map(|(_, c)| c).collect();
        for closer in pending {
            closer.close();
        }
    }
}

/// Transaction handle returned by [`SynchronizedStore::begin`].
pub struct SynchronizedTransaction {
    store: Arc<Shared>,
    tx: Arc<TxState>,
}

impl SynchronizedTransaction {
    /// Number of returned streams still open
    pub fn open_streams(&self) -> usize {
        self.tx.streams.lock().len()
    }
}

impl ForwardingTransaction for SynchronizedTransaction {
    fn forward<T>(
        &mut self,
        op: Operation,
        call: impl FnOnce(&mut dyn Transaction) -> Result<T>,
    ) -> Result<T> {
        self.tx.check_active()?;
        if op.is_write() {
            self.tx.check_writable()?;
        }
        let mut delegate = self.tx.delegate.lock();
        call(delegate.as_mut())
    }

    fn returned(&mut self, _op: Operation, stream: RecordStream) -> RecordStream {
        self.tx.register(stream)
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        self.store.end_transaction(&self.tx, commit)
    }
}

impl Drop for SynchronizedTransaction {
    fn drop(&mut self) {
        if self.tx.ended.load(Ordering::Acquire) {
            return;
        }
        warn!(tx = self.tx.id, "transaction dropped without end(), rolling back");
        if let Err(e) = self.store.end_transaction(&self.tx, false) {
            error!(tx = self.tx.id, error = %e, "failed to roll back dropped transaction");
        }
    }
}

impl fmt::Debug for SynchronizedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedTransaction")
            .field("id", &self.tx.id)
            .field("read_only", &self.tx.read_only)
            .field("ended", &self.tx.ended.load(Ordering::Relaxed))
            .finish()
    }
}
