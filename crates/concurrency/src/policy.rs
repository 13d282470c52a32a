//! Admission policies
//!
//! A synchronizer is configured by a compact specification string:
//!
//! | Spec | Meaning |
//! |------|---------|
//! | `"N"` | up to N concurrent read-only transactions, writes disabled |
//! | `"N:0"` | same as `"N"` |
//! | `"N:K"` | up to N concurrent transactions, at most K of them read-write |
//! | `"N:WX"` | a read-write transaction runs alone for its whole lifetime |
//! | `"N:CX"` | one read-write transaction at a time, exclusive only while committing |

use std::fmt;
use std::str::FromStr;

use kstore_core::Error;
use thiserror::Error;

/// How read-write transactions are admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Read-write transactions are rejected
    Disabled,
    /// At most `k` concurrent read-write transactions
    Bounded(usize),
    /// A read-write transaction excludes every other transaction
    Exclusive,
    /// A read-write transaction excludes every other transaction only during commit
    CommitExclusive,
}

impl WritePolicy {
    /// Whether read-write transactions can be started at all
    pub fn allows_writes(&self) -> bool {
        !matches!(self, WritePolicy::Disabled)
    }

    /// Permits of the write semaphore, if any
    pub(crate) fn write_permits(&self) -> Option<usize> {
        match self {
            WritePolicy::Disabled => None,
            WritePolicy::Bounded(k) => Some((*k).max(1)),
            WritePolicy::Exclusive | WritePolicy::CommitExclusive => Some(1),
        }
    }
}

/// Parsed synchronizer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizerSpec {
    /// Maximum number of concurrent transactions (N)
    pub max_concurrent_tx: usize,
    /// Policy for read-write transactions
    pub write_policy: WritePolicy,
}

/// Errors produced while validating a synchronizer specification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    /// The text is not of the form `N`, `N:K`, `N:WX` or `N:CX`
    #[error("illegal synchronizer specification '{0}'")]
    Malformed(String),

    /// N must be positive
    #[error("maximum number of concurrent transactions must be positive")]
    NoTransactions,

    /// K must not exceed N
    #[error("write transactions ({max_write_tx}) exceed concurrent transactions ({max_concurrent_tx})")]
    TooManyWriters {
        /// Requested K
        max_write_tx: usize,
        /// Configured N
        max_concurrent_tx: usize,
    },
}

impl From<SpecError> for Error {
    fn from(e: SpecError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl SynchronizerSpec {
    /// Validate and build a specification
    pub fn new(max_concurrent_tx: usize, write_policy: WritePolicy) -> Result<Self, SpecError> {
        if max_concurrent_tx == 0 {
            return Err(SpecError::NoTransactions);
        }
        let write_policy = match write_policy {
            WritePolicy::Bounded(0) => WritePolicy::Disabled,
            WritePolicy::Bounded(k) if k > max_concurrent_tx => {
                return Err(SpecError::TooManyWriters {
                    max_write_tx: k,
                    max_concurrent_tx,
                })
            }
            other => other,
        };
        Ok(Self {
            max_concurrent_tx,
            write_policy,
        })
    }
}

impl FromStr for SynchronizerSpec {
    type Err = SpecError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let malformed = || SpecError::Malformed(spec.to_string());

        let (first, second) = match spec.split_once(':') {
            Some((first, second)) => (first.trim(), Some(second.trim())),
            None => (spec.trim(), None),
        };

        let max_concurrent_tx: usize = first.parse().map_err(|_| malformed())?;
        let write_policy = match second {
            None => WritePolicy::Disabled,
            Some(s) if s.eq_ignore_ascii_case("WX") => WritePolicy::Exclusive,
            Some(s) if s.eq_ignore_ascii_case("CX") => WritePolicy::CommitExclusive,
            Some(s) => WritePolicy::Bounded(s.parse().map_err(|_| malformed())?),
        };

        SynchronizerSpec::new(max_concurrent_tx, write_policy)
    }
}

impl fmt::Display for SynchronizerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.write_policy {
            WritePolicy::Disabled => write!(f, "{}:0", self.max_concurrent_tx),
            WritePolicy::Bounded(k) => write!(f, "{}:{}", self.max_concurrent_tx, k),
            WritePolicy::Exclusive => write!(f, "{}:WX", self.max_concurrent_tx),
            WritePolicy::CommitExclusive => write!(f, "{}:CX", self.max_concurrent_tx),
        }
    }
}
