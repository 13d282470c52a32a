//! Transaction admission control
//!
//! The [`Synchronizer`] decides when a transaction may start and when it may
//! commit, based on a [`SynchronizerSpec`]. It owns up to three fair
//! semaphores:
//!
//! - **main** (N permits): one per running transaction; holding all N makes
//!   the holder exclusive
//! - **write** (K permits, 1 for `WX`/`CX`): one per running read-write transaction
//! - **commit** (1 permit, `CX` only): serializes commit windows
//!
//! ## Permit accounting
//!
//! | Call | Read-only | `Bounded`/`CX` write | `WX` write |
//! |------|-----------|----------------------|------------|
//! | begin_transaction | main ×1 | write ×1, main ×1 | write ×1, main ×N |
//! | begin_commit | - | `CX`: commit ×1, main ×(N−1) | - |
//!
//! Every successful `begin_*` must be paired with exactly one `end_*` of the
//! same kind, including on failure paths; otherwise permits leak for good.
//! A failed `begin_*` holds nothing.
//!
//! Under `"1:CX"` the commit window needs no extra main permit: the committing
//! writer already holds the only one.

use std::fmt;
use std::str::FromStr;

use kstore_core::{Error, Result};
use tracing::debug;

use crate::interrupt::Interrupt;
use crate::policy::{SpecError, SynchronizerSpec, WritePolicy};
use crate::semaphore::Semaphore;

fn acquire(semaphore: &Semaphore, n: usize, interrupt: Option<&Interrupt>) -> Result<()> {
    match interrupt {
        Some(interrupt) => semaphore.acquire_interruptible(n, interrupt),
        None => semaphore.acquire(n),
    }
}

/// Semaphore-based transaction admission controller.
#[derive(Debug)]
pub struct Synchronizer {
    spec: SynchronizerSpec,
    main: Semaphore,
    write: Option<Semaphore>,
    commit: Option<Semaphore>,
}

impl Synchronizer {
    /// Create a synchronizer enforcing `spec`
    pub fn new(spec: SynchronizerSpec) -> Self {
        let synchronizer = Self {
            main: Semaphore::new(spec.max_concurrent_tx),
            write: spec.write_policy.write_permits().map(Semaphore::new),
            commit: (spec.write_policy == WritePolicy::CommitExclusive).then(|| Semaphore::new(1)),
            spec,
        };
        debug!(spec = %spec, "synchronizer configured");
        synchronizer
    }

    /// The enforced specification
    pub fn spec(&self) -> SynchronizerSpec {
        self.spec
    }

    fn all_permits(&self) -> usize {
        self.spec.max_concurrent_tx
    }

    /// Main permits held by a running read-write transaction
    fn write_main_permits(&self) -> usize {
        match self.spec.write_policy {
            WritePolicy::Exclusive => self.all_permits(),
            _ => 1,
        }
    }

    /// Block until a transaction of the given kind may start.
    ///
    /// Fails with [`Error::IllegalState`] for read-write transactions when
    /// writes are disabled, and with [`Error::Interrupted`] if the wait is
    /// aborted; in both cases no permit is retained.
    pub fn begin_transaction(&self, read_only: bool) -> Result<()> {
        self.admit(read_only, None)
    }

    /// Like [`Synchronizer::begin_transaction`], but gives up with
    /// [`Error::Interrupted`] once `interrupt` is set. Only this attempt is
    /// aborted; the synchronizer stays usable.
    pub fn begin_transaction_interruptible(
        &self,
        read_only: bool,
        interrupt: &Interrupt,
    ) -> Result<()> {
        self.admit(read_only, Some(interrupt))
    }

    fn admit(&self, read_only: bool, interrupt: Option<&Interrupt>) -> Result<()> {
        if read_only {
            return acquire(&self.main, 1, interrupt);
        }
        let write = self
            .write
            .as_ref()
            .ok_or_else(|| Error::illegal_state("write transactions have been disabled"))?;
        acquire(write, 1, interrupt)?;
        if let Err(e) = acquire(&self.main, self.write_main_permits(), interrupt) {
            write.release(1);
            return Err(e);
        }
        Ok(())
    }

    /// Release the permits taken by a successful [`Synchronizer::begin_transaction`]
    pub fn end_transaction(&self, read_only: bool) {
        if read_only {
            self.main.release(1);
        } else {
            self.main.release(self.write_main_permits());
            if let Some(write) = &self.write {
                write.release(1);
            }
        }
    }

    /// Enter the commit window of a running read-write transaction.
    ///
    /// Under `CX` this blocks until the caller is the only running
    /// transaction; under every other policy it returns immediately.
    pub fn begin_commit(&self) -> Result<()> {
        let Some(commit) = &self.commit else {
            return Ok(());
        };
        commit.acquire(1)?;
        if let Err(e) = self.main.acquire(self.all_permits() - 1) {
            commit.release(1);
            return Err(e);
        }
        Ok(())
    }

    /// Leave the commit window entered by [`Synchronizer::begin_commit`]
    pub fn end_commit(&self) {
        if let Some(commit) = &self.commit {
            self.main.release(self.all_permits() - 1);
            commit.release(1);
        }
    }

    /// Block until no transaction is running and prevent new ones from starting
    pub fn begin_exclusive(&self) -> Result<()> {
        self.main.acquire(self.all_permits())
    }

    /// Undo [`Synchronizer::begin_exclusive`]
    pub fn end_exclusive(&self) {
        self.main.release(self.all_permits());
    }

    /// RAII form of [`Synchronizer::begin_exclusive`]
    pub fn exclusive(&self) -> Result<ExclusiveGuard<'_>> {
        self.begin_exclusive()?;
        Ok(ExclusiveGuard { synchronizer: self })
    }

    /// Abort every wait in progress, whatever its kind.
    ///
    /// Aborted callers hold no permit. Permits already held can still be
    /// released, and calls made afterwards wait as usual.
    pub fn interrupt(&self) {
        self.main.interrupt();
        if let Some(write) = &self.write {
            write.interrupt();
        }
        if let Some(commit) = &self.commit {
            commit.interrupt();
        }
    }

    /// Main permits not currently held
    pub fn available_permits(&self) -> usize {
        self.main.available_permits()
    }
}

impl FromStr for Synchronizer {
    type Err = SpecError;

    fn from_str(spec: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Synchronizer::new(spec.parse()?))
    }
}

impl fmt::Display for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.spec, f)
    }
}

/// Holds every main permit until dropped.
#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    synchronizer: &'a Synchronizer,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.synchronizer.end_exclusive();
    }
}
