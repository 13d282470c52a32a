//! Cancellation of a single blocking wait
//!
//! An [`Interrupt`] is handed to one interruptible acquisition, such as
//! [`Synchronizer::begin_transaction_interruptible`](crate::Synchronizer::begin_transaction_interruptible).
//! Calling [`Interrupt::interrupt`] from any thread makes that acquisition
//! give up its place in line and fail with `Error::Interrupted`. Other waiters
//! and later acquisitions are not affected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often an interruptible waiter re-checks its token
pub(crate) const INTERRUPT_POLL: Duration = Duration::from_millis(5);

/// Shared cancellation flag for one blocking attempt.
///
/// Clones share the flag: keep one clone in the waiting thread and use the
/// other to interrupt it.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// A token that has not been interrupted
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the wait using this token. Idempotent.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether [`Interrupt::interrupt`] has been called
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
