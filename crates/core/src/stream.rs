//! Lazy, closeable record sequences
//!
//! Every query operation of a transaction returns a [`RecordStream`]. A stream
//! owns backend resources until it is exhausted, dropped or explicitly closed.
//!
//! ## Close hooks
//!
//! Wrappers attach hooks with [`RecordStream::on_close`]. Hooks run exactly
//! once, on the first of:
//! - an explicit [`RecordStream::close`]
//! - a close through a detached [`StreamCloser`] (possibly from another thread)
//! - dropping the stream
//!
//! A hook attached to an already-closed stream runs immediately.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::record::Record;

type Source = Box<dyn Iterator<Item = Result<Record>> + Send>;
type CloseHook = Box<dyn FnOnce() + Send>;

struct StreamCore {
    source: Mutex<Option<Source>>,
    hooks: Mutex<Vec<CloseHook>>,
    closed: AtomicBool,
}

impl StreamCore {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Release backend resources before notifying hooks
        drop(self.source.lock().take());
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook();
        }
    }
}

/// A lazy sequence of records that must be closed to release its resources.
pub struct RecordStream {
    core: Arc<StreamCore>,
}

impl RecordStream {
    /// Stream over an arbitrary fallible iterator
    pub fn from_results<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Result<Record>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            core: Arc::new(StreamCore {
                source: Mutex::new(Some(Box::new(iter.into_iter()))),
                hooks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Stream over already materialized records
    pub fn from_vec(records: Vec<Record>) -> Self {
        Self::from_results(records.into_iter().map(Ok))
    }

    /// Empty stream
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Attach a hook that runs once when the stream is closed
    pub fn on_close(self, hook: impl FnOnce() + Send + 'static) -> Self {
        let mut hooks = self.core.hooks.lock();
        if self.core.closed.load(Ordering::Acquire) {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
            drop(hooks);
        }
        self
    }

    /// Count consumed records into `count`, and set `eof` once the
    /// underlying sequence is exhausted
    pub fn track(self, count: Arc<AtomicU64>, eof: Arc<AtomicBool>) -> Self {
        let mut source = self.core.source.lock();
        if let Some(inner) = source.take() {
            *source = Some(Box::new(Tracked { inner, count, eof }));
        }
        drop(source);
        self
    }

    /// Detached handle able to close this stream
    pub fn closer(&self) -> StreamCloser {
        StreamCloser {
            core: Arc::clone(&self.core),
        }
    }

    /// Close the stream, releasing its resources. Idempotent.
    pub fn close(&self) {
        self.core.close();
    }

    /// Whether the stream has been closed
    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }

    /// Consume the remaining records into a vector, then close the stream
    pub fn to_vec(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for record in &mut self {
            records.push(record?);
        }
        self.close();
        Ok(records)
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.core.closed.load(Ordering::Acquire) {
            return None;
        }
        let mut source = self.core.source.lock();
        source.as_mut().and_then(|iter| iter.next())
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        self.core.close();
    }
}

impl fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Thread-safe handle that closes a [`RecordStream`] without owning it.
#[derive(Clone)]
pub struct StreamCloser {
    core: Arc<StreamCore>,
}

impl StreamCloser {
    /// Close the associated stream. Idempotent.
    pub fn close(&self) {
        self.core.close();
    }

    /// Whether the associated stream has been closed
    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for StreamCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCloser")
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Tracked {
    inner: Source,
    count: Arc<AtomicU64>,
    eof: Arc<AtomicBool>,
}

impl Iterator for Tracked {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next();
        match next {
            Some(_) => {
                self.count.fetch_add(1, Ordering::Relaxed);
            }
            None => self.eof.store(true, Ordering::Relaxed),
        }
        next
    }
}
