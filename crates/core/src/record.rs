//! Records and their property values
//!
//! A [`Record`] is an identity plus a mapping from property identifiers to
//! ordered lists of [`Value`]s. The data-access layer treats records as opaque
//! apart from their identity and the ability to copy and project them.

use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;

use crate::types::Uri;

/// Values of a single property. Most properties hold exactly one value.
pub type Values = SmallVec<[Value; 1]>;

/// A property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Reference to another record or vocabulary term
    Uri(Uri),
    /// Plain literal
    Literal(String),
    /// Integer literal
    Integer(i64),
    /// Boolean literal
    Boolean(bool),
    /// Nested record
    Record(Box<Record>),
}

impl From<Uri> for Value {
    fn from(uri: Uri) -> Self {
        Value::Uri(uri)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Literal(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Literal(text)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(Box::new(record))
    }
}

/// A record: identity plus property values.
///
/// # Examples
///
/// ```
/// use kstore_core::{Record, Uri, Value};
///
/// let title = Uri::new("dct:title");
/// let record = Record::new("ks:doc1").with(title.clone(), "Annual report");
/// assert_eq!(record.get(&title), &[Value::from("Annual report")]);
/// ```
#[derive(Clone, PartialEq)]
pub struct Record {
    id: Uri,
    properties: BTreeMap<Uri, Values>,
}

impl Record {
    /// Create an empty record with the given identity
    pub fn new(id: impl Into<Uri>) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Identity of the record
    pub fn id(&self) -> &Uri {
        &self.id
    }

    /// Values of a property, empty if unset
    pub fn get(&self, property: &Uri) -> &[Value] {
        self.properties
            .get(property)
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    /// First value of a property
    pub fn first(&self, property: &Uri) -> Option<&Value> {
        self.get(property).first()
    }

    /// Replace the values of a property. An empty list removes it.
    pub fn set(&mut self, property: Uri, values: impl IntoIterator<Item = Value>) {
        let values: Values = values.into_iter().collect();
        if values.is_empty() {
            self.properties.remove(&property);
        } else {
            self.properties.insert(property, values);
        }
    }

    /// Append a value to a property
    pub fn add(&mut self, property: Uri, value: impl Into<Value>) {
        self.properties.entry(property).or_default().push(value.into());
    }

    /// Builder-style [`Record::add`]
    pub fn with(mut self, property: Uri, value: impl Into<Value>) -> Self {
        self.add(property, value);
        self
    }

    /// Remove a property, returning its values
    pub fn remove(&mut self, property: &Uri) -> Option<Values> {
        self.properties.remove(property)
    }

    /// Properties that have at least one value, in sorted order
    pub fn properties(&self) -> impl Iterator<Item = &Uri> {
        self.properties.keys()
    }

    /// Number of properties with values
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the record has no property values
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Drop every property not in `projection`
    pub fn retain(&mut self, projection: &[Uri]) {
        self.properties.retain(|property, _| projection.contains(property));
    }

    /// Copy of this record restricted to `projection`.
    ///
    /// An empty projection means "all properties".
    pub fn projected(&self, projection: &[Uri]) -> Record {
        if projection.is_empty() {
            return self.clone();
        }
        Record {
            id: self.id.clone(),
            properties: self
                .properties
                .iter()
                .filter(|(property, _)| projection.contains(property))
                .map(|(property, values)| (property.clone(), values.clone()))
                .collect(),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        map.entry(&"@id", &self.id);
        for (property, values) in &self.properties {
            map.entry(property, values);
        }
        map.finish()
    }
}
