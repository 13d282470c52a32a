//! Convenient imports for kstore.
//!
//! ```ignore
//! use kstore::prelude::*;
//!
//! let repo = Repository::memory()?;
//! repo.write(|tx| tx.store(RecordType::Entity, Record::new("ex:alice")))?;
//! ```

// Main entry point
pub use crate::builder::StoreBuilder;
pub use crate::repository::Repository;

// Configuration
pub use crate::config::StoreConfig;

// Error handling
pub use kstore_core::{Error, Result};

// Store contract
pub use kstore_core::{Store, Transaction};

// Data model
pub use kstore_core::{Condition, Record, RecordStream, RecordType, Uri, Value};
