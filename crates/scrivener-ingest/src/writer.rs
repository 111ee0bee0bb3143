//! Batch writer: one batch, one transaction.
//!
//! The writer executes a batch's inserts as a single atomic unit: either
//! every record in the batch commits or none does. Transient database
//! failures are retried with exponential backoff; exhausting the retry
//! budget (or hitting a non-retryable data error) yields a failed
//! [`BatchResult`] rather than an error, so the job can continue to the
//! next batch. Programming errors (malformed SQL from a bad mapping)
//! propagate immediately.
//!
//! Retried batches are at-least-once: the writer does not deduplicate.
//! Destinations that must tolerate a retry after an ambiguous failure are
//! expected to carry a content-hash column enforced downstream.

use crate::error::{Error, Result};
use crate::statement::{InsertStatement, SqlDialect, StatementSnapshot};
use async_trait::async_trait;
use scrivener_core::{Batch, ScalarValue};
use sqlx::postgres::PgArguments;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;

/// How a write error should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorKind {
    /// Worth retrying: connection trouble, lock contention, timeout.
    Transient,
    /// Not retryable, but expected: constraint violation, bad value.
    /// The batch fails; the job continues.
    Data,
    /// A programming or configuration defect. The job must stop.
    Fatal,
}

/// A classified database write error.
#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct WriteError {
    /// Handling class.
    pub kind: WriteErrorKind,
    /// Human-readable cause.
    pub message: String,
    /// SQLSTATE code, when the server reported one.
    pub sqlstate: Option<String>,
}

/// Map a SQLSTATE code onto a handling class.
///
/// Retryable: serialization failure (40001), deadlock (40P01), lock not
/// available (55P03), statement cancel/timeout (57014), connection
/// exceptions (08xxx) and resource exhaustion (53xxx). Data errors: value
/// exceptions (22xxx) and constraint violations (23xxx). Syntax errors and
/// undefined objects (42xxx) are programming defects.
pub fn classify_sqlstate(code: &str) -> WriteErrorKind {
    match code {
        "40001" | "40P01" | "55P03" | "57014" => WriteErrorKind::Transient,
        _ if code.starts_with("08") || code.starts_with("53") => WriteErrorKind::Transient,
        _ if code.starts_with("22") || code.starts_with("23") => WriteErrorKind::Data,
        _ if code.starts_with("42") => WriteErrorKind::Fatal,
        _ => WriteErrorKind::Data,
    }
}

/// Classify a raw sqlx error.
pub fn classify(error: sqlx::Error) -> WriteError {
    let (kind, sqlstate) = match &error {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string());
            let kind = code
                .as_deref()
                .map_or(WriteErrorKind::Data, classify_sqlstate);
            (kind, code)
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => (WriteErrorKind::Transient, None),
        sqlx::Error::Configuration(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => (WriteErrorKind::Fatal, None),
        _ => (WriteErrorKind::Transient, None),
    };
    WriteError {
        kind,
        message: error.to_string(),
        sqlstate,
    }
}

/// Retry budget for one batch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per batch, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Executes one prepared insert against the destination store.
///
/// The seam between the retry loop and the database, so batch handling is
/// testable without a live server.
#[async_trait]
pub trait InsertExecutor: Send + Sync {
    /// Run the statement with the given row values inside one transaction,
    /// returning the number of rows inserted.
    async fn execute(
        &self,
        statement: &InsertStatement,
        rows: &[Vec<ScalarValue>],
    ) -> std::result::Result<u64, WriteError>;
}

#[async_trait]
impl<E: InsertExecutor> InsertExecutor for Arc<E> {
    async fn execute(
        &self,
        statement: &InsertStatement,
        rows: &[Vec<ScalarValue>],
    ) -> std::result::Result<u64, WriteError> {
        (**self).execute(statement, rows).await
    }
}

/// [`InsertExecutor`] over a postgres connection pool.
pub struct SqlInsertExecutor {
    pool: PgPool,
}

impl SqlInsertExecutor {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bind_scalar<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    value: &'q ScalarValue,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match value {
        ScalarValue::Null => query.bind(Option::<String>::None),
        ScalarValue::Bool(b) => query.bind(*b),
        ScalarValue::Int(i) => query.bind(*i),
        ScalarValue::Float(f) => query.bind(*f),
        ScalarValue::Text(s) => query.bind(s.as_str()),
    }
}

#[async_trait]
impl InsertExecutor for SqlInsertExecutor {
    async fn execute(
        &self,
        statement: &InsertStatement,
        rows: &[Vec<ScalarValue>],
    ) -> std::result::Result<u64, WriteError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let mut query = sqlx::query(&statement.sql);
        for row in rows {
            for value in row {
                query = bind_scalar(query, value);
            }
        }

        let done = query.execute(&mut *tx).await.map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(done.rows_affected())
    }
}

/// Outcome of writing one batch: all records committed, or none.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Records committed: the full batch size, or zero.
    pub committed_count: usize,

    /// Present when the batch failed after exhausting its handling.
    pub failure: Option<FailedBatch>,
}

impl BatchResult {
    /// Whether the batch committed.
    pub fn is_committed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Details of a failed batch, carried into the audit trail.
#[derive(Debug, Clone)]
pub struct FailedBatch {
    /// The final, classified cause.
    pub cause: WriteError,

    /// Attempts spent before giving up.
    pub attempts: u32,

    /// Statement-and-parameter snapshot for replay while debugging.
    pub statement: StatementSnapshot,
}

/// Drives one batch through build → execute → retry.
pub struct BatchWriter<E> {
    executor: E,
    dialect: SqlDialect,
    policy: RetryPolicy,
}

impl<E: InsertExecutor> BatchWriter<E> {
    /// Create a writer with the given executor and retry policy.
    pub fn new(executor: E, dialect: SqlDialect, policy: RetryPolicy) -> Self {
        Self {
            executor,
            dialect,
            policy,
        }
    }

    /// Write one batch to `table` as a single atomic unit.
    ///
    /// Returns a failed [`BatchResult`] for expected database errors;
    /// returns `Err` only for fatal conditions (the job must stop).
    pub async fn write(&self, batch: &Batch, table: &str) -> Result<BatchResult> {
        let statement = InsertStatement::build(self.dialect, table, batch)?;
        let rows = statement.row_values(batch);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.executor.execute(&statement, &rows).await {
                Ok(affected) => {
                    if affected != batch.len() as u64 {
                        tracing::warn!(
                            affected,
                            expected = batch.len(),
                            table,
                            "insert affected an unexpected row count"
                        );
                    }
                    tracing::debug!(rows = batch.len(), attempt, table, "batch committed");
                    return Ok(BatchResult {
                        committed_count: batch.len(),
                        failure: None,
                    });
                }
                Err(cause) => match cause.kind {
                    WriteErrorKind::Fatal => {
                        tracing::error!(%cause, table, "fatal write error, aborting job");
                        return Err(Error::FatalWrite(cause));
                    }
                    WriteErrorKind::Transient if attempt < self.policy.max_attempts => {
                        let delay = self.policy.backoff_for(attempt);
                        tracing::warn!(
                            %cause,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            table,
                            "transient write error, retrying batch"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    _ => {
                        tracing::warn!(%cause, attempt, table, "batch failed");
                        return Ok(BatchResult {
                            committed_count: 0,
                            failure: Some(FailedBatch {
                                cause,
                                attempts: attempt,
                                statement: statement.snapshot(batch),
                            }),
                        });
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrivener_core::MappedRecord;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Executor that replays a script of outcomes.
    struct ScriptedExecutor {
        script: Mutex<VecDeque<std::result::Result<u64, WriteError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedExecutor {
        fn new(script: Vec<std::result::Result<u64, WriteError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl InsertExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _statement: &InsertStatement,
            rows: &[Vec<ScalarValue>],
        ) -> std::result::Result<u64, WriteError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(rows.len() as u64))
        }
    }

    fn write_error(kind: WriteErrorKind, sqlstate: Option<&str>) -> WriteError {
        WriteError {
            kind,
            message: "boom".to_string(),
            sqlstate: sqlstate.map(str::to_string),
        }
    }

    fn batch(n: usize) -> Batch {
        let records = (0..n)
            .map(|i| {
                let mut record = MappedRecord::new();
                record.set("id", ScalarValue::Int(i as i64));
                record
            })
            .collect();
        Batch::new(records).unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn writer(executor: ScriptedExecutor) -> BatchWriter<ScriptedExecutor> {
        BatchWriter::new(executor, SqlDialect::Postgres, fast_policy())
    }

    #[test]
    fn sqlstate_classification() {
        assert_eq!(classify_sqlstate("40001"), WriteErrorKind::Transient);
        assert_eq!(classify_sqlstate("40P01"), WriteErrorKind::Transient);
        assert_eq!(classify_sqlstate("55P03"), WriteErrorKind::Transient);
        assert_eq!(classify_sqlstate("57014"), WriteErrorKind::Transient);
        assert_eq!(classify_sqlstate("08006"), WriteErrorKind::Transient);
        assert_eq!(classify_sqlstate("53300"), WriteErrorKind::Transient);
        assert_eq!(classify_sqlstate("23505"), WriteErrorKind::Data);
        assert_eq!(classify_sqlstate("22P02"), WriteErrorKind::Data);
        assert_eq!(classify_sqlstate("42601"), WriteErrorKind::Fatal);
        assert_eq!(classify_sqlstate("42P01"), WriteErrorKind::Fatal);
    }

    #[test]
    fn io_errors_are_transient() {
        let err = classify(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert_eq!(err.kind, WriteErrorKind::Transient);
        assert!(err.sqlstate.is_none());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn commits_on_first_attempt() {
        let writer = writer(ScriptedExecutor::new(vec![Ok(5)]));
        let result = writer.write(&batch(5), "t").await.unwrap();
        assert!(result.is_committed());
        assert_eq!(result.committed_count, 5);
    }

    #[tokio::test]
    async fn retries_transient_then_commits() {
        let executor = ScriptedExecutor::new(vec![
            Err(write_error(WriteErrorKind::Transient, Some("40P01"))),
            Ok(4),
        ]);
        let writer = writer(executor);
        let result = writer.write(&batch(4), "t").await.unwrap();
        assert!(result.is_committed());
        assert_eq!(result.committed_count, 4);
        assert_eq!(writer.executor.calls(), 2);
    }

    #[tokio::test]
    async fn transient_exhaustion_fails_the_batch() {
        let executor = ScriptedExecutor::new(vec![
            Err(write_error(WriteErrorKind::Transient, None)),
            Err(write_error(WriteErrorKind::Transient, None)),
            Err(write_error(WriteErrorKind::Transient, None)),
        ]);
        let writer = writer(executor);
        let result = writer.write(&batch(2), "t").await.unwrap();
        let failure = result.failure.expect("failed batch");
        assert_eq!(result.committed_count, 0);
        assert_eq!(failure.attempts, 3);
        assert_eq!(writer.executor.calls(), 3);
    }

    #[tokio::test]
    async fn data_errors_do_not_retry() {
        let executor = ScriptedExecutor::new(vec![Err(write_error(
            WriteErrorKind::Data,
            Some("23505"),
        ))]);
        let writer = writer(executor);
        let result = writer.write(&batch(3), "customers").await.unwrap();
        let failure = result.failure.expect("failed batch");
        assert_eq!(writer.executor.calls(), 1);
        assert_eq!(failure.cause.sqlstate.as_deref(), Some("23505"));
        // replay snapshot carries the statement and every bound row
        assert!(failure.statement.sql.contains("INSERT INTO customers"));
        assert_eq!(
            failure.statement.parameters.as_array().unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn outcome_is_never_partial() {
        for script in [
            vec![Ok(2)],
            vec![Err(write_error(WriteErrorKind::Data, None))],
        ] {
            let writer = writer(ScriptedExecutor::new(script));
            let result = writer.write(&batch(2), "t").await.unwrap();
            assert!(result.committed_count == 0 || result.committed_count == 2);
        }
    }

    #[tokio::test]
    async fn fatal_errors_propagate() {
        let executor = ScriptedExecutor::new(vec![Err(write_error(
            WriteErrorKind::Fatal,
            Some("42601"),
        ))]);
        let writer = writer(executor);
        let err = writer.write(&batch(1), "t").await.unwrap_err();
        assert!(matches!(err, Error::FatalWrite(_)));
        assert_eq!(writer.executor.calls(), 1);
    }
}
