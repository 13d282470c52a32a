//! Core identifier types
//!
//! This module defines the fundamental types used throughout the system:
//! - [`Uri`]: Identity of records and properties
//! - [`RecordType`]: The fixed set of record categories a store partitions data by
//! - [`TypeMap`]: A dense per-type table used for caches and change buffers

use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Error;

/// Identifier of a record or of a record property.
///
/// Cheap to clone: the text is shared behind an `Arc`.
///
/// # Examples
///
/// ```
/// use kstore_core::Uri;
///
/// let id = Uri::new("ks:doc1");
/// assert_eq!(id.as_str(), "ks:doc1");
/// assert_eq!(id, Uri::from("ks:doc1"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri(Arc<str>);

impl Uri {
    /// Create a new Uri from its textual form
    pub fn new(text: impl AsRef<str>) -> Self {
        Uri(Arc::from(text.as_ref()))
    }

    /// Textual form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Uri {
    fn from(text: &str) -> Self {
        Uri::new(text)
    }
}

impl From<String> for Uri {
    fn from(text: String) -> Self {
        Uri(Arc::from(text))
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// Category of a record.
///
/// Stores keep one table per type; caches and change buffers are
/// partitioned the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    /// A document or other source resource
    Resource,
    /// A fragment of a resource that mentions something
    Mention,
    /// An entity referred to by mentions
    Entity,
    /// A context grouping axioms
    Context,
}

impl RecordType {
    /// Number of supported record types
    pub const COUNT: usize = 4;

    /// All supported record types, in table order
    pub const ALL: [RecordType; RecordType::COUNT] = [
        RecordType::Resource,
        RecordType::Mention,
        RecordType::Entity,
        RecordType::Context,
    ];

    /// Dense index of this type, in `0..COUNT`
    pub const fn index(self) -> usize {
        match self {
            RecordType::Resource => 0,
            RecordType::Mention => 1,
            RecordType::Entity => 2,
            RecordType::Context => 3,
        }
    }

    /// Canonical name
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordType::Resource => "resource",
            RecordType::Mention => "mention",
            RecordType::Entity => "entity",
            RecordType::Context => "context",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::invalid_argument(format!("unsupported record type '{}'", s)))
    }
}

/// Dense map from every [`RecordType`] to a value.
///
/// Every type always has an entry, so lookups never fail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeMap<T>([T; RecordType::COUNT]);

impl<T> TypeMap<T> {
    /// Build a map by computing the value of each type
    pub fn from_fn(mut f: impl FnMut(RecordType) -> T) -> Self {
        TypeMap(RecordType::ALL.map(&mut f))
    }

    /// Iterate over `(type, value)` pairs in table order
    pub fn iter(&self) -> impl Iterator<Item = (RecordType, &T)> {
        RecordType::ALL.into_iter().zip(self.0.iter())
    }

    /// Iterate mutably over `(type, value)` pairs in table order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (RecordType, &mut T)> {
        RecordType::ALL.into_iter().zip(self.0.iter_mut())
    }
}

impl<T> Index<RecordType> for TypeMap<T> {
    type Output = T;

    fn index(&self, ty: RecordType) -> &T {
        &self.0[ty.index()]
    }
}

impl<T> IndexMut<RecordType> for TypeMap<T> {
    fn index_mut(&mut self, ty: RecordType) -> &mut T {
        &mut self.0[ty.index()]
    }
}
