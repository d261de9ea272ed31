//! Row identities and keyed deltas.

use crate::model::snapshot::{ResultSnapshot, Row};
use crate::model::value::Value;
use serde::{Serialize, Serializer};
use std::fmt;

/// Column used as row identity for incremental live queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiffKey(String);

impl DiffKey {
    pub fn new(column: impl Into<String>) -> Self {
        Self(column.into())
    }

    pub fn column(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DiffKey {
    fn from(column: &str) -> Self {
        Self::new(column)
    }
}

impl From<String> for DiffKey {
    fn from(column: String) -> Self {
        Self(column)
    }
}

impl fmt::Display for DiffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hashable projection of a key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Null,
    Integer(i64),
    /// Bit pattern of an `f64`
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl RowKey {
    pub fn to_value(&self) -> Value {
        match self {
            RowKey::Null => Value::Null,
            RowKey::Integer(i) => Value::Integer(*i),
            RowKey::Real(bits) => Value::Real(f64::from_bits(*bits)),
            RowKey::Text(s) => Value::Text(s.clone()),
            RowKey::Blob(b) => Value::Blob(b.clone()),
        }
    }
}

impl From<&Value> for RowKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => RowKey::Null,
            Value::Integer(i) => RowKey::Integer(*i),
            Value::Real(r) => RowKey::Real(r.to_bits()),
            Value::Text(s) => RowKey::Text(s.clone()),
            Value::Blob(b) => RowKey::Blob(b.clone()),
        }
    }
}

impl From<i64> for RowKey {
    fn from(v: i64) -> Self {
        RowKey::Integer(v)
    }
}

impl From<&str> for RowKey {
    fn from(v: &str) -> Self {
        RowKey::Text(v.to_string())
    }
}

impl Serialize for RowKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Row-level changes between two consecutive snapshots of one keyed query.
///
/// Updated rows carry the full new row; consumers replace the whole row.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Delta {
    pub added: Vec<Row>,
    pub updated: Vec<Row>,
    pub removed: Vec<RowKey>,
}

impl Delta {
    /// Delta against an empty prior: every row is added.
    pub fn initial(snapshot: &ResultSnapshot) -> Self {
        Self {
            added: snapshot.rows().to_vec(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total number of changed rows.
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}
