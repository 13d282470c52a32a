//! Fair counting semaphore
//!
//! Waiters are served strictly in arrival order: a waiter asking for many
//! permits blocks every later waiter, even those whose smaller request could
//! be satisfied right away. This is what makes an exclusive acquisition
//! (all permits) eventually succeed under a steady stream of single-permit
//! requests.
//!
//! Waits can be aborted in two ways, and neither leaves the semaphore
//! unusable:
//! - [`Semaphore::interrupt`] fails every acquisition waiting at that moment;
//! - [`Semaphore::acquire_interruptible`] fails a single acquisition once its
//!   [`Interrupt`] token is set.
//!
//! An aborted waiter leaves the queue and holds no permit.

use std::collections::VecDeque;

use kstore_core::{Error, Result};
use parking_lot::{Condvar, Mutex};

use crate::interrupt::{Interrupt, INTERRUPT_POLL};

#[derive(Debug)]
struct State {
    permits: usize,
    queue: VecDeque<u64>,
    next_ticket: u64,
    /// Bumped by `interrupt()`; waiters that saw an older value give up
    epoch: u64,
}

/// Fair (FIFO) counting semaphore with blocking acquisition.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<State>,
    changed: Condvar,
}

impl Semaphore {
    /// Create a semaphore with `permits` available permits
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State {
                permits,
                queue: VecDeque::new(),
                next_ticket: 0,
                epoch: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Acquire `n` permits, blocking until they are available and every
    /// earlier waiter has been served. Acquiring zero permits never waits.
    pub fn acquire(&self, n: usize) -> Result<()> {
        self.acquire_with(n, None)
    }

    /// Like [`Semaphore::acquire`], but fails with [`Error::Interrupted`] once
    /// `interrupt` is set, including when it is already set on entry.
    pub fn acquire_interruptible(&self, n: usize, interrupt: &Interrupt) -> Result<()> {
        self.acquire_with(n, Some(interrupt))
    }

    fn acquire_with(&self, n: usize, interrupt: Option<&Interrupt>) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let mut state = self.state.lock();
        let epoch = state.epoch;
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);

        loop {
            if state.epoch != epoch || interrupt.map_or(false, Interrupt::is_interrupted) {
                state.queue.retain(|t| *t != ticket);
                // Whoever was behind us may now be first in line
                self.changed.notify_all();
                return Err(Error::Interrupted("wait for permits interrupted".into()));
            }
            if state.queue.front() == Some(&ticket) && state.permits >= n {
                state.permits -= n;
                state.queue.pop_front();
                // The next waiter in line may now be eligible
                self.changed.notify_all();
                return Ok(());
            }
            match interrupt {
                // Tokens cannot signal the condvar, so re-check periodically
                Some(_) => {
                    self.changed.wait_for(&mut state, INTERRUPT_POLL);
                }
                None => self.changed.wait(&mut state),
            }
        }
    }

    /// Acquire `n` permits only if they are available and nobody is waiting
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut state = self.state.lock();
        if !state.queue.is_empty() || state.permits < n {
            return false;
        }
        state.permits -= n;
        true
    }

    /// Return `n` permits
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.permits += n;
        self.changed.notify_all();
    }

    /// Fail every acquisition currently waiting. Later acquisitions are
    /// unaffected.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        self.changed.notify_all();
    }

    /// Permits currently available
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Number of threads blocked in [`Semaphore::acquire`]
    pub fn queue_length(&self) -> usize {
        self.state.lock().queue.len()
    }
}
