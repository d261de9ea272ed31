//! Immutable result snapshots.
//!
//! A snapshot is produced once per statement run and never mutated
//! afterwards. Live queries share snapshots as `Arc<ResultSnapshot>`, so a
//! reader holding an older snapshot is unaffected by later runs.

use crate::model::value::{FieldType, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Name and engine-reported type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// One result row, values aligned with the snapshot's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Full result of one statement run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSnapshot {
    fields: Vec<FieldDescriptor>,
    rows: Vec<Row>,
    rows_affected: u64,
}

impl ResultSnapshot {
    pub fn new(fields: Vec<FieldDescriptor>, rows: Vec<Row>) -> Self {
        Self {
            fields,
            rows,
            rows_affected: 0,
        }
    }

    /// Snapshot with no columns and no rows.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Record how many rows a write statement changed.
    pub fn with_rows_affected(mut self, rows_affected: u64) -> Self {
        self.rows_affected = rows_affected;
        self
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the first column with this name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Value of a named column in row `row`.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Type of the column at `index`, `Unknown` when out of range.
    pub fn field_type(&self, index: usize) -> FieldType {
        self.fields
            .get(index)
            .map(|f| f.field_type)
            .unwrap_or(FieldType::Unknown)
    }

    /// Render one row as a JSON object keyed by column name.
    pub fn row_to_json(&self, row: &Row) -> JsonValue {
        let mut obj = Map::new();
        for (field, value) in self.fields.iter().zip(row.values()) {
            obj.insert(
                field.name.clone(),
                serde_json::to_value(value).unwrap_or(JsonValue::Null),
            );
        }
        JsonValue::Object(obj)
    }

    /// Render the snapshot as `{ "fields": [...], "rows": [{..}, ..] }`.
    pub fn to_json(&self) -> JsonValue {
        let rows: Vec<JsonValue> = self.rows.iter().map(|r| self.row_to_json(r)).collect();
        serde_json::json!({
            "fields": self.fields,
            "rows": rows,
        })
    }
}
