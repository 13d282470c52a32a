//! Debug logging decorator
//!
//! [`LoggingStore`] forwards every call to its delegate and, when `DEBUG` is
//! enabled for this module, logs the call with its outcome and elapsed time.
//! Returned streams are tracked so that their closing logs how many records
//! were consumed and whether the end of the sequence was reached.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use kstore_core::{ForwardingTransaction, Operation, RecordStream, Result, Store, Transaction};
use tracing::{debug, Level};

fn timed<T>(tx: u64, op: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    if !tracing::enabled!(Level::DEBUG) {
        return f();
    }
    let start = Instant::now();
    let result = f();
    match &result {
        Ok(_) => debug!(tx, op, elapsed = ?start.elapsed(), "done"),
        Err(e) => debug!(tx, op, elapsed = ?start.elapsed(), error = %e, "failed"),
    }
    result
}

/// A [`Store`] wrapper logging every call at `DEBUG`.
pub struct LoggingStore {
    delegate: Box<dyn Store>,
    next_tx_id: AtomicU64,
}

impl LoggingStore {
    /// Wrap `delegate`
    pub fn new(delegate: Box<dyn Store>) -> Self {
        Self {
            delegate,
            next_tx_id: AtomicU64::new(1),
        }
    }
}

impl Store for LoggingStore {
    fn init(&self) -> Result<()> {
        timed(0, "init", || self.delegate.init())
    }

    fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>> {
        let id = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
        let op = if read_only { "begin read-only" } else { "begin read-write" };
        let delegate = timed(id, op, || self.delegate.begin(read_only))?;
        Ok(Box::new(LoggingTransaction { id, delegate }))
    }

    fn close(&self) {
        let start = Instant::now();
        self.delegate.close();
        debug!(elapsed = ?start.elapsed(), "store closed");
    }
}

impl fmt::Debug for LoggingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingStore").finish_non_exhaustive()
    }
}

/// Transaction handle returned by [`LoggingStore::begin`].
pub struct LoggingTransaction {
    id: u64,
    delegate: Box<dyn Transaction>,
}

impl LoggingTransaction {
    fn track(&self, op: &'static str, stream: RecordStream) -> RecordStream {
        if !tracing::enabled!(Level::DEBUG) {
            return stream;
        }
        let tx = self.id;
        let count = Arc::new(AtomicU64::new(0));
        let eof = Arc::new(AtomicBool::new(false));
        let (c, e) = (Arc::clone(&count), Arc::clone(&eof));
        stream.track(count, eof).on_close(move || {
            debug!(
                tx,
                op,
                records = c.load(Ordering::Relaxed),
                eof = e.load(Ordering::Relaxed),
                "stream closed"
            );
        })
    }
}

impl ForwardingTransaction for LoggingTransaction {
    fn forward<T>(
        &mut self,
        op: Operation,
        call: impl FnOnce(&mut dyn Transaction) -> Result<T>,
    ) -> Result<T> {
        timed(self.id, op.name(), || call(self.delegate.as_mut()))
    }

    fn returned(&mut self, op: Operation, stream: RecordStream) -> RecordStream {
        self.track(op.name(), stream)
    }
}

impl fmt::Debug for LoggingTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingTransaction").field("id", &self.id).finish()
    }
}
