//! Mapped records and batches.
//!
//! A [`MappedRecord`] is a record that has already been translated from
//! source field names to destination column names by the upstream extractor.
//! It preserves column order, which in turn fixes the column order of the
//! insert statements built for each [`Batch`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scalar value destined for one destination-table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Text.
    Text(String),
}

impl ScalarValue {
    /// Convert a JSON value into a scalar.
    ///
    /// Arrays and objects should not reach this layer (the extractor
    /// flattens them); if one does, it is carried as its JSON text so the
    /// value is never silently dropped.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ScalarValue::Null,
            Value::Bool(b) => ScalarValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ScalarValue::Int(i)
                } else {
                    ScalarValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => ScalarValue::Text(s.clone()),
            other => ScalarValue::Text(other.to_string()),
        }
    }

    /// Render the scalar back into a JSON value, e.g. for a statement
    /// parameter snapshot on an audit entry.
    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Null => Value::Null,
            ScalarValue::Bool(b) => Value::Bool(*b),
            ScalarValue::Int(i) => Value::from(*i),
            ScalarValue::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)
            }
            ScalarValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Whether this scalar is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }
}

/// An ordered mapping from destination column name to scalar value.
///
/// Every column named here is expected to exist in the destination table's
/// column set; unmapped source fields are dropped by the extractor before
/// records reach this type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MappedRecord {
    entries: Vec<(String, ScalarValue)>,
}

impl MappedRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column's value, replacing an existing value in place or
    /// appending the column at the end of the ordering.
    pub fn set(&mut self, column: impl Into<String>, value: ScalarValue) {
        let column = column.into();
        if let Some(entry) = self.entries.iter_mut().find(|(c, _)| *c == column) {
            entry.1 = value;
        } else {
            self.entries.push((column, value));
        }
    }

    /// Look up a column's value.
    pub fn get(&self, column: &str) -> Option<&ScalarValue> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    /// Column names in mapping order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    /// Iterate over `(column, value)` pairs in mapping order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Number of mapped columns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record maps no columns at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a record from a flat JSON object, preserving key order.
    pub fn from_json_object(object: &serde_json::Map<String, Value>) -> Self {
        let entries = object
            .iter()
            .map(|(column, value)| (column.clone(), ScalarValue::from_json(value)))
            .collect();
        Self { entries }
    }

    /// Render the record as a JSON object, preserving column order.
    pub fn to_json_object(&self) -> Value {
        let mut object = serde_json::Map::with_capacity(self.entries.len());
        for (column, value) in &self.entries {
            object.insert(column.clone(), value.to_json());
        }
        Value::Object(object)
    }
}

impl FromIterator<(String, ScalarValue)> for MappedRecord {
    fn from_iter<T: IntoIterator<Item = (String, ScalarValue)>>(iter: T) -> Self {
        let mut record = MappedRecord::new();
        for (column, value) in iter {
            record.set(column, value);
        }
        record
    }
}

/// A bounded, ordered, non-empty group of records inserted as one atomic
/// unit.
///
/// The constructor enforces non-emptiness, so a `Batch` handed to the writer
/// always carries at least one record.
#[derive(Debug, Clone)]
pub struct Batch {
    records: Vec<MappedRecord>,
}

impl Batch {
    /// Create a batch from a non-empty record vector.
    pub fn new(records: Vec<MappedRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::EmptyBatch);
        }
        Ok(Self { records })
    }

    /// Number of records in the batch (always at least 1).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always `false`; the constructor rejects empty batches.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The records, in input order.
    pub fn records(&self) -> &[MappedRecord] {
        &self.records
    }

    /// The first record, which fixes the batch's column ordering.
    pub fn first(&self) -> &MappedRecord {
        &self.records[0]
    }
}
