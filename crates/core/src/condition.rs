//! Record selection conditions
//!
//! Conditions are opaque to the data-access layer: it only forwards them to
//! the backend. The backend evaluates them with [`Condition::matches`].

use std::fmt;
use std::sync::Arc;

use crate::record::{Record, Value};
use crate::types::Uri;

type Predicate = dyn Fn(&Record) -> bool + Send + Sync;

/// A predicate over records with a human-readable description.
#[derive(Clone)]
pub struct Condition {
    description: Arc<str>,
    predicate: Arc<Predicate>,
}

impl Condition {
    /// Create a condition from a description and a predicate
    pub fn new(
        description: impl AsRef<str>,
        predicate: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: Arc::from(description.as_ref()),
            predicate: Arc::new(predicate),
        }
    }

    /// Matches records having at least one value for `property`
    pub fn has_property(property: Uri) -> Self {
        let description = format!("exists({})", property);
        Self::new(description, move |record| !record.get(&property).is_empty())
    }

    /// Matches records where `property` has `value` among its values
    pub fn equals(property: Uri, value: impl Into<Value>) -> Self {
        let value = value.into();
        let description = format!("{} = {:?}", property, value);
        Self::new(description, move |record| record.get(&property).contains(&value))
    }

    /// Evaluate the condition on a record
    pub fn matches(&self, record: &Record) -> bool {
        (self.predicate)(record)
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.description).finish()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
