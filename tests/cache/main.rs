//! Transactional cache integration tests
//!
//! Tests for the two-level cache: coherence across transactions, isolation,
//! write buffering and failure handling.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test cache
//! cargo test --test cache buffering::
//! ```

#[path = "../common/mod.rs"]
mod common;

mod coherence;
mod failures;
