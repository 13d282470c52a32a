//! Core types for kstore
//!
//! This crate defines the store contract shared by every layer:
//! - [`Record`], [`Value`] and the [`Uri`] identifiers
//! - [`RecordType`] partitioning and the dense [`TypeMap`]
//! - [`RecordStream`]: lazy, closeable result sequences
//! - [`Store`] / [`Transaction`]: the contract backends and decorators implement
//! - [`Error`]: the failure taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod condition;
pub mod error;
pub mod record;
pub mod stream;
pub mod traits;
pub mod types;

pub use condition::Condition;
pub use error::{Error, Result};
pub use record::{Record, Value, Values};
pub use stream::{RecordStream, StreamCloser};
pub use traits::{
    ForwardingTransaction, MatchConditions, MatchIds, MatchProperties, Operation, Store,
    Transaction,
};
pub use types::{RecordType, TypeMap, Uri};
