//! Insert statement building.
//!
//! One batch becomes one multi-row `INSERT` executed inside one
//! transaction. Column names come from the batch's first record (mapping
//! order preserved), are lower-cased and double-quoted in the statement
//! text, and placeholder style follows the destination dialect.

use crate::error::{Error, Result};
use scrivener_core::{Batch, ScalarValue};
use serde_json::Value;

/// Placeholder dialect of the destination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// `$1, $2, ...`
    Postgres,
    /// `:1, :2, ...`
    Oracle,
}

impl SqlDialect {
    fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${index}"),
            SqlDialect::Oracle => format!(":{index}"),
        }
    }
}

/// Reject names that cannot be used as a table or column identifier.
///
/// Accepts dot-separated segments of `[A-Za-z_][A-Za-z0-9_$]*` so
/// schema-qualified table names pass. Anything else is a programming or
/// configuration defect, surfaced before a statement is ever built.
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid_segment = |segment: &str| {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };
    if !name.is_empty() && name.split('.').all(valid_segment) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

/// A rendered multi-row insert for one batch.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    /// Statement text with dialect placeholders.
    pub sql: String,

    /// Column names in bind order, as mapped on the records (original
    /// casing; the statement text uses the lower-cased form).
    pub columns: Vec<String>,

    /// Number of rows the statement inserts.
    pub rows: usize,
}

impl InsertStatement {
    /// Build the insert for a batch.
    ///
    /// The first record fixes the column set and order; later records are
    /// bound by looking up those columns, with NULL for any they omit.
    pub fn build(dialect: SqlDialect, table: &str, batch: &Batch) -> Result<Self> {
        validate_identifier(table)?;

        let columns: Vec<String> = batch.first().columns().map(str::to_string).collect();
        if columns.is_empty() {
            return Err(Error::Config(
                "record maps no columns; nothing to insert".to_string(),
            ));
        }
        for column in &columns {
            validate_identifier(column)?;
        }

        let column_list = columns
            .iter()
            .map(|c| format!("\"{}\"", c.to_lowercase()))
            .collect::<Vec<_>>()
            .join(", ");

        let mut tuples = Vec::with_capacity(batch.len());
        let mut index = 1;
        for _ in 0..batch.len() {
            let tuple = (0..columns.len())
                .map(|_| {
                    let placeholder = dialect.placeholder(index);
                    index += 1;
                    placeholder
                })
                .collect::<Vec<_>>()
                .join(", ");
            tuples.push(format!("({tuple})"));
        }

        let sql = format!(
            "INSERT INTO {table} ({column_list}) VALUES {}",
            tuples.join(", ")
        );

        Ok(Self {
            sql,
            columns,
            rows: batch.len(),
        })
    }

    /// Bind values for every row, in statement order. Columns a record
    /// does not map bind as NULL.
    pub fn row_values(&self, batch: &Batch) -> Vec<Vec<ScalarValue>> {
        batch
            .records()
            .iter()
            .map(|record| {
                self.columns
                    .iter()
                    .map(|column| record.get(column).cloned().unwrap_or(ScalarValue::Null))
                    .collect()
            })
            .collect()
    }

    /// Statement-and-parameter snapshot for an audit entry, so a failed
    /// batch can be replayed while debugging.
    pub fn snapshot(&self, batch: &Batch) -> StatementSnapshot {
        let parameters = self
            .row_values(batch)
            .iter()
            .map(|row| Value::Array(row.iter().map(ScalarValue::to_json).collect()))
            .collect();
        StatementSnapshot {
            sql: self.sql.clone(),
            parameters: Value::Array(parameters),
        }
    }
}

/// Statement text plus its bound parameters, rendered for the logs table.
#[derive(Debug, Clone)]
pub struct StatementSnapshot {
    /// The statement text.
    pub sql: String,

    /// Row-major array of bound parameter values.
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrivener_core::MappedRecord;

    fn record(pairs: &[(&str, ScalarValue)]) -> MappedRecord {
        let mut record = MappedRecord::new();
        for (column, value) in pairs {
            record.set(*column, value.clone());
        }
        record
    }

    fn two_row_batch() -> Batch {
        Batch::new(vec![
            record(&[
                ("CustomerId", ScalarValue::Int(1)),
                ("Name", ScalarValue::Text("Ada".to_string())),
            ]),
            record(&[
                ("CustomerId", ScalarValue::Int(2)),
                ("Name", ScalarValue::Text("Grace".to_string())),
            ]),
        ])
        .unwrap()
    }

    #[test]
    fn postgres_statement_shape() {
        let stmt =
            InsertStatement::build(SqlDialect::Postgres, "customers", &two_row_batch()).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO customers (\"customerid\", \"name\") VALUES ($1, $2), ($3, $4)"
        );
        assert_eq!(stmt.rows, 2);
        assert_eq!(stmt.columns, vec!["CustomerId", "Name"]);
    }

    #[test]
    fn oracle_statement_shape() {
        let stmt =
            InsertStatement::build(SqlDialect::Oracle, "customers", &two_row_batch()).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO customers (\"customerid\", \"name\") VALUES (:1, :2), (:3, :4)"
        );
    }

    #[test]
    fn missing_columns_bind_null() {
        let batch = Batch::new(vec![
            record(&[("a", ScalarValue::Int(1)), ("b", ScalarValue::Int(2))]),
            record(&[("a", ScalarValue::Int(3))]),
        ])
        .unwrap();
        let stmt = InsertStatement::build(SqlDialect::Postgres, "t", &batch).unwrap();
        let rows = stmt.row_values(&batch);
        assert_eq!(rows[1], vec![ScalarValue::Int(3), ScalarValue::Null]);
    }

    #[test]
    fn snapshot_carries_sql_and_parameters() {
        let batch = two_row_batch();
        let stmt = InsertStatement::build(SqlDialect::Postgres, "customers", &batch).unwrap();
        let snapshot = stmt.snapshot(&batch);
        assert!(snapshot.sql.starts_with("INSERT INTO customers"));
        assert_eq!(
            snapshot.parameters,
            serde_json::json!([[1, "Ada"], [2, "Grace"]])
        );
    }

    #[test]
    fn schema_qualified_table_accepted() {
        assert!(validate_identifier("staging.customer_records").is_ok());
    }

    #[test]
    fn hostile_identifiers_rejected() {
        for name in ["", "1abc", "a b", "x;y", "a\"b", "a.", ".a"] {
            assert!(
                validate_identifier(name).is_err(),
                "expected rejection of {name:?}"
            );
        }
    }

    #[test]
    fn empty_record_is_a_config_error() {
        let batch = Batch::new(vec![MappedRecord::new()]).unwrap();
        let err = InsertStatement::build(SqlDialect::Postgres, "t", &batch).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
