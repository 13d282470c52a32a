//! The store contract
//!
//! [`Store`] and [`Transaction`] are implemented both by concrete backends and
//! by the decorators that wrap them (admission control, lifecycle enforcement,
//! caching, logging). A decorator holds its delegate and forwards every call it
//! does not need to change; [`ForwardingTransaction`] provides that forwarding
//! for transaction decorators.
//!
//! ## Lifecycle
//!
//! ```text
//! Store:       new ──init()──▶ initialized ──close()──▶ closed
//! Transaction: begin(read_only) ──▶ active ──end(commit)──▶ ended
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::condition::Condition;
use crate::error::Result;
use crate::record::Record;
use crate::stream::RecordStream;
use crate::types::{RecordType, Uri};

/// Per-type selection conditions of a `match` request
pub type MatchConditions = HashMap<RecordType, Condition>;

/// Per-type id selections of a `match` request
pub type MatchIds = HashMap<RecordType, Vec<Uri>>;

/// Per-type projections of a `match` request. Only the listed types are
/// returned; an empty property list means "all properties".
pub type MatchProperties = HashMap<RecordType, Vec<Uri>>;

/// A persistent record store.
///
/// Stores are shared between threads; each transaction is driven by one
/// thread at a time.
pub trait Store: Send + Sync {
    /// Prepare the store for use. Called once before any `begin`.
    fn init(&self) -> Result<()>;

    /// Start a transaction
    fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>>;

    /// Release the store. Never fails; problems are logged.
    fn close(&self);
}

/// A shared store is still a store; this lets one layer be both wrapped and
/// inspected.
impl<S: Store + ?Sized> Store for Arc<S> {
    fn init(&self) -> Result<()> {
        (**self).init()
    }

    fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>> {
        (**self).begin(read_only)
    }

    fn close(&self) {
        (**self).close()
    }
}

/// A unit of work against a [`Store`].
pub trait Transaction: Send {
    /// Records of `ty` with the given ids. Ids with no record are skipped.
    ///
    /// `properties` restricts the returned properties; `None` or an empty
    /// slice returns them all.
    fn lookup(
        &mut self,
        ty: RecordType,
        ids: &[Uri],
        properties: Option<&[Uri]>,
    ) -> Result<RecordStream>;

    /// All records of `ty` satisfying `condition`
    fn retrieve(
        &mut self,
        ty: RecordType,
        condition: Option<&Condition>,
        properties: Option<&[Uri]>,
    ) -> Result<RecordStream>;

    /// Number of records of `ty` satisfying `condition`
    fn count(&mut self, ty: RecordType, condition: Option<&Condition>) -> Result<u64>;

    /// Combined selection across record types
    fn match_records(
        &mut self,
        conditions: &MatchConditions,
        ids: &MatchIds,
        properties: &MatchProperties,
    ) -> Result<RecordStream>;

    /// Create or replace a record
    fn store(&mut self, ty: RecordType, record: Record) -> Result<()>;

    /// Delete a record; deleting a missing record is not an error
    fn delete(&mut self, ty: RecordType, id: &Uri) -> Result<()>;

    /// Commit (`true`) or roll back (`false`). After `end`, the transaction
    /// is ended even if an error is returned.
    fn end(&mut self, commit: bool) -> Result<()>;
}

impl std::fmt::Debug for dyn Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

// =============================================================================
// Forwarding decorators
// =============================================================================

/// A call passed through a [`ForwardingTransaction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`Transaction::lookup`]
    Lookup,
    /// [`Transaction::retrieve`]
    Retrieve,
    /// [`Transaction::count`]
    Count,
    /// [`Transaction::match_records`]
    Match,
    /// [`Transaction::store`]
    Store,
    /// [`Transaction::delete`]
    Delete,
    /// [`Transaction::end`] with `commit = true`
    Commit,
    /// [`Transaction::end`] with `commit = false`
    Rollback,
}

impl Operation {
    /// Short lowercase name, for logs
    pub fn name(self) -> &'static str {
        match self {
            Operation::Lookup => "lookup",
            Operation::Retrieve => "retrieve",
            Operation::Count => "count",
            Operation::Match => "match",
            Operation::Store => "store",
            Operation::Delete => "delete",
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
        }
    }

    /// Whether the call modifies data
    pub fn is_write(self) -> bool {
        matches!(self, Operation::Store | Operation::Delete)
    }
}

/// A transaction decorator that passes every call to a wrapped transaction.
///
/// Implementors only say how to reach the delegate, through
/// [`forward`](ForwardingTransaction::forward), and override the hooks whose
/// behavior they change. [`Transaction`] is implemented for every
/// `ForwardingTransaction`.
pub trait ForwardingTransaction: Send {
    /// Run `call` against the wrapped transaction
    fn forward<T>(
        &mut self,
        op: Operation,
        call: impl FnOnce(&mut dyn Transaction) -> Result<T>,
    ) -> Result<T>;

    /// Called with every stream returned by `lookup`, `retrieve` or `match`
    fn returned(&mut self, _op: Operation, stream: RecordStream) -> RecordStream {
        stream
    }

    /// Commit or roll back the wrapped transaction
    fn finish(&mut self, commit: bool) -> Result<()> {
        let op = if commit {
            Operation::Commit
        } else {
            Operation::Rollback
        };
        self.forward(op, |tx| tx.end(commit))
    }
}

impl<F: ForwardingTransaction> Transaction for F {
    fn lookup(
        &mut self,
        ty: RecordType,
        ids: &[Uri],
        properties: Option<&[Uri]>,
    ) -> Result<RecordStream> {
        let stream = self.forward(Operation::Lookup, |tx| tx.lookup(ty, ids, properties))?;
        Ok(self.returned(Operation::Lookup, stream))
    }

    fn retrieve(
        &mut self,
        ty: RecordType,
        condition: Option<&Condition>,
        properties: Option<&[Uri]>,
    ) -> Result<RecordStream> {
        let stream = self.forward(Operation::Retrieve, |tx| {
            tx.retrieve(ty, condition, properties)
        })?;
        Ok(self.returned(Operation::Retrieve, stream))
    }

    fn count(&mut self, ty: RecordType, condition: Option<&Condition>) -> Result<u64> {
        self.forward(Operation::Count, |tx| tx.count(ty, condition))
    }

    fn match_records(
        &mut self,
        conditions: &MatchConditions,
        ids: &MatchIds,
        properties: &MatchProperties,
    ) -> Result<RecordStream> {
        let stream = self.forward(Operation::Match, |tx| {
            tx.match_records(conditions, ids, properties)
        })?;
        Ok(self.returned(Operation::Match, stream))
    }

    fn store(&mut self, ty: RecordType, record: Record) -> Result<()> {
        self.forward(Operation::Store, move |tx| tx.store(ty, record))
    }

    fn delete(&mut self, ty: RecordType, id: &Uri) -> Result<()> {
        self.forward(Operation::Delete, |tx| tx.delete(ty, id))
    }

    fn end(&mut self, commit: bool) -> Result<()> {
        self.finish(commit)
    }
}
