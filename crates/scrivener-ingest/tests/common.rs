//! Shared fixtures for the pipeline tests: a scripted executor standing in
//! for the destination database, plus job assembly helpers.

use async_trait::async_trait;
use scrivener_core::{standard_definitions, ErrorCatalog, MappedRecord, ScalarValue};
use scrivener_ingest::{
    AuditLogger, BatchWriter, CancelFlag, FallbackLog, IngestionJob, InsertExecutor,
    InsertStatement, InterfaceConfig, MemoryAuditSink, RetryPolicy, SqlDialect, WriteError,
    WriteErrorKind,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Executor replaying a script of per-call outcomes. Calls beyond the
/// script commit.
pub struct MockExecutor {
    script: Mutex<VecDeque<Result<(), WriteError>>>,
    calls: AtomicUsize,
    cancel_after: Option<(usize, CancelFlag)>,
}

impl MockExecutor {
    pub fn new(script: Vec<Result<(), WriteError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    /// Like [`MockExecutor::new`], but raises the cancel flag once `after`
    /// calls have been made, modeling an operator interrupting mid-run.
    pub fn cancelling_after(
        script: Vec<Result<(), WriteError>>,
        after: usize,
        flag: CancelFlag,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            cancel_after: Some((after, flag)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InsertExecutor for MockExecutor {
    async fn execute(
        &self,
        _statement: &InsertStatement,
        rows: &[Vec<ScalarValue>],
    ) -> Result<u64, WriteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, flag)) = &self.cancel_after {
            if call >= *after {
                flag.cancel();
            }
        }
        match self.script.lock().unwrap().pop_front() {
            None | Some(Ok(())) => Ok(rows.len() as u64),
            Some(Err(error)) => Err(error),
        }
    }
}

pub fn transient_error() -> WriteError {
    WriteError {
        kind: WriteErrorKind::Transient,
        message: "connection reset by peer".to_string(),
        sqlstate: Some("08006".to_string()),
    }
}

pub fn constraint_violation() -> WriteError {
    WriteError {
        kind: WriteErrorKind::Data,
        message: "duplicate key value violates unique constraint".to_string(),
        sqlstate: Some("23505".to_string()),
    }
}

pub fn fatal_error() -> WriteError {
    WriteError {
        kind: WriteErrorKind::Fatal,
        message: "syntax error at or near \"VALEUS\"".to_string(),
        sqlstate: Some("42601".to_string()),
    }
}

/// Mapped records with two columns, numbered for identification.
pub fn records(n: usize) -> Vec<MappedRecord> {
    (0..n)
        .map(|i| {
            let mut record = MappedRecord::new();
            record.set("customer_id", ScalarValue::Int(i as i64));
            record.set("name", ScalarValue::Text(format!("customer-{i}")));
            record
        })
        .collect()
}

pub fn test_config(batch_size: usize) -> InterfaceConfig {
    serde_json::from_value(serde_json::json!({
        "interfaceType": "mist-ams",
        "dbType": "postgres",
        "host": "db.internal",
        "port": 5432,
        "database": "ingest",
        "user": "loader",
        "password": "secret",
        "tableName": "customer_records",
        "logsTableName": "ingest_logs",
        "sqlBatchSize": batch_size,
        "errorDefinitionSourceType": "db",
        "errorDefinitionSourceLocation": "error_definitions"
    }))
    .expect("valid test config")
}

pub fn catalog() -> Arc<ErrorCatalog> {
    Arc::new(ErrorCatalog::from_definitions(standard_definitions()).unwrap())
}

/// Catalog snapshot missing one symbol, for internal-consistency tests.
pub fn catalog_without(symbol: &str) -> Arc<ErrorCatalog> {
    let definitions = standard_definitions()
        .into_iter()
        .filter(|d| d.symbol != symbol);
    Arc::new(ErrorCatalog::from_definitions(definitions).unwrap())
}

/// An assembled job plus handles onto its collaborators.
pub struct TestJob {
    pub job: IngestionJob<Arc<MockExecutor>, Arc<MemoryAuditSink>>,
    pub executor: Arc<MockExecutor>,
    pub sink: Arc<MemoryAuditSink>,
    _dir: tempfile::TempDir,
}

pub fn try_build_job(
    batch_size: usize,
    executor: MockExecutor,
    catalog: Arc<ErrorCatalog>,
    cancel: CancelFlag,
) -> Result<TestJob, scrivener_ingest::Error> {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(executor);
    let sink = Arc::new(MemoryAuditSink::new());

    let policy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    };
    let writer = BatchWriter::new(Arc::clone(&executor), SqlDialect::Postgres, policy);
    let audit = AuditLogger::new(
        Arc::clone(&sink),
        FallbackLog::new(dir.path().join("fallback_logs.json")),
        catalog,
        "loader",
        "customer_records",
    );

    let job = IngestionJob::new(test_config(batch_size), writer, audit, cancel)?;
    Ok(TestJob {
        job,
        executor,
        sink,
        _dir: dir,
    })
}

pub fn build_job(batch_size: usize, executor: MockExecutor) -> TestJob {
    try_build_job(batch_size, executor, catalog(), CancelFlag::new())
        .expect("job assembly with a valid config")
}
