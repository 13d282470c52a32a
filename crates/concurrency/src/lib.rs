//! Concurrency layer for kstore
//!
//! This crate implements transaction admission control:
//! - Semaphore: fair (FIFO) blocking counting semaphore
//! - Interrupt: cancellation token for a single blocking wait
//! - WritePolicy / SynchronizerSpec: the `"N"`, `"N:K"`, `"N:WX"`, `"N:CX"` policies
//! - Synchronizer: begin/commit/exclusive permit protocol on top of the semaphores

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod interrupt;
pub mod policy;
pub mod semaphore;
pub mod synchronizer;

pub use interrupt::Interrupt;
pub use policy::{SpecError, SynchronizerSpec, WritePolicy};
pub use semaphore::Semaphore;
pub use synchronizer::{ExclusiveGuard, Synchronizer};
