//! Audit logger: the structured, symbol-coded job history.
//!
//! Every job step becomes one row in the logs table, correlated by the
//! run's `ctx_id`. The logs table is strictly append-only: entries are
//! never updated or deleted; each one carries its own status and times.
//!
//! Persistence failures degrade to a local durable fallback log and never
//! abort the job. Catalog failures (unknown symbol, template mismatch) DO
//! abort: once a step cannot be coded correctly, the trail itself is
//! untrustworthy.

use crate::config::LogsSchema;
use crate::error::Result;
use crate::statement::{validate_identifier, StatementSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scrivener_core::{ErrorCatalog, Severity};
use serde::Serialize;
use sqlx::PgPool;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Identity of one pipeline run.
///
/// Created when the job starts, immutable for the run's duration, and
/// attached to every audit entry the run writes.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Correlation identifier tying the run's audit entries together.
    pub ctx_id: Uuid,
    /// Job name, e.g. `customer_records BATCH INS`.
    pub job_name: String,
    /// Job type: the interface name.
    pub job_type: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl JobContext {
    /// Open a context with a fresh `ctx_id`.
    pub fn new(job_name: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            ctx_id: Uuid::new_v4(),
            job_name: job_name.into(),
            job_type: job_type.into(),
            started_at: Utc::now(),
        }
    }
}

/// Status recorded on an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditStatus {
    /// Step is underway (job start entries).
    #[serde(rename = "IN PROGRESS")]
    InProgress,
    /// Step succeeded.
    #[serde(rename = "SUCCESS")]
    Success,
    /// Step failed.
    #[serde(rename = "FAILURE")]
    Failure,
    /// Terminal: some batches committed, some failed.
    #[serde(rename = "PARTIAL")]
    Partial,
    /// Terminal: the input sequence was empty.
    #[serde(rename = "NO RECORDS")]
    NoRecords,
}

impl AuditStatus {
    /// The token persisted in the logs table's status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::InProgress => "IN PROGRESS",
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failure => "FAILURE",
            AuditStatus::Partial => "PARTIAL",
            AuditStatus::NoRecords => "NO RECORDS",
        }
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row destined for the logs table.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Correlation identifier of the run.
    pub ctx_id: Uuid,
    /// Job name from the context.
    pub job_name: String,
    /// Job type from the context.
    pub job_type: String,
    /// Catalog symbol this entry is coded under.
    pub symbol: String,
    /// Effective severity (catalog severity unless overridden).
    pub severity: Severity,
    /// Step status.
    pub status: AuditStatus,
    /// When the step began.
    pub start_time: DateTime<Utc>,
    /// When the step finished, for completed steps.
    pub end_time: Option<DateTime<Utc>>,
    /// Message composed from the symbol's description template.
    pub message: String,
    /// Underlying error detail, for failed steps.
    pub error_message: Option<String>,
    /// Statement text snapshot, for failed batch steps.
    pub statement: Option<String>,
    /// Bound parameter snapshot matching `statement`.
    pub parameters: Option<serde_json::Value>,
    /// Source artifact being ingested (e.g. input file name).
    pub artifact_name: Option<String>,
    /// User the job ran as.
    pub user_id: String,
    /// Host the job ran on.
    pub host_name: String,
    /// Destination table of the run.
    pub table_name: String,
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one entry. Implementations must never update or delete
    /// previously appended entries.
    async fn append(&self, entry: &AuditEntry) -> Result<()>;
}

#[async_trait]
impl<S: AuditSink> AuditSink for Arc<S> {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        (**self).append(entry).await
    }
}

/// [`AuditSink`] appending to the logs table over a postgres pool.
pub struct SqlAuditSink {
    pool: PgPool,
    sql: String,
}

impl SqlAuditSink {
    /// Prepare the insert for the given logs table and column mapping.
    pub fn new(pool: PgPool, logs_table: &str, schema: &LogsSchema) -> Result<Self> {
        validate_identifier(logs_table)?;
        let columns = schema.columns();
        for column in columns {
            validate_identifier(column)?;
        }

        let column_list = columns
            .iter()
            .map(|c| format!("\"{}\"", c.to_lowercase()))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("INSERT INTO {logs_table} ({column_list}) VALUES ({placeholders})");

        Ok(Self { pool, sql })
    }
}

#[async_trait]
impl AuditSink for SqlAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        // Bind order mirrors LogsSchema::columns.
        sqlx::query(&self.sql)
            .bind(&entry.job_name)
            .bind(&entry.job_type)
            .bind(&entry.symbol)
            .bind(entry.severity.as_letter())
            .bind(entry.status.as_str())
            .bind(entry.start_time)
            .bind(entry.end_time)
            .bind(&entry.message)
            .bind(entry.error_message.as_deref())
            .bind(entry.statement.as_deref())
            .bind(entry.parameters.clone())
            .bind(entry.artifact_name.as_deref())
            .bind(&entry.user_id)
            .bind(&entry.host_name)
            .bind(&entry.table_name)
            .bind(entry.ctx_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory [`AuditSink`], for tests and dry runs.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Local durable log used when the audit store is unreachable.
///
/// JSON lines, size-rotated. Writing here is best-effort: a failure
/// degrades to tracing output, never to an error.
pub struct FallbackLog {
    path: PathBuf,
    max_bytes: u64,
    max_backups: u32,
}

impl FallbackLog {
    /// Fallback log at `path` with the default rotation (5 MB, keep 3).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_rotation(path, 5 * 1024 * 1024, 3)
    }

    /// Fallback log with explicit rotation settings.
    pub fn with_rotation(path: impl Into<PathBuf>, max_bytes: u64, max_backups: u32) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            max_backups,
        }
    }

    /// Append one entry, degrading to tracing output on failure.
    pub fn append(&self, entry: &AuditEntry) {
        if let Err(error) = self.try_append(entry) {
            tracing::error!(
                %error,
                path = %self.path.display(),
                "fallback log write failed"
            );
            tracing::warn!(
                entry = %serde_json::to_string(entry).unwrap_or_default(),
                "unpersisted audit entry"
            );
        }
    }

    fn try_append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        self.rotate_if_needed()?;
        let line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if len < self.max_bytes {
            return Ok(());
        }
        for index in (1..self.max_backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                let _ = fs::rename(&from, self.backup_path(index + 1));
            }
        }
        fs::rename(&self.path, self.backup_path(1))
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        PathBuf::from(format!("{}.{index}", self.path.display()))
    }
}

/// Per-entry fields supplied by the caller; everything else comes from the
/// context, the catalog and the logger's own configuration.
#[derive(Debug, Default)]
pub struct EntryDetails {
    /// Step status.
    pub status: AuditStatus,
    /// Override the catalog severity for this entry.
    pub severity_override: Option<Severity>,
    /// Positional arguments for the symbol's description template.
    pub message_args: Vec<String>,
    /// When the step began; defaults to now.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step finished.
    pub ended_at: Option<DateTime<Utc>>,
    /// Underlying error detail.
    pub error_message: Option<String>,
    /// Statement snapshot for replay.
    pub statement: Option<StatementSnapshot>,
    /// Source artifact name.
    pub artifact_name: Option<String>,
}

impl Default for AuditStatus {
    fn default() -> Self {
        AuditStatus::InProgress
    }
}

/// Composes and persists audit entries.
///
/// Holds a read-only catalog snapshot; concurrent jobs may hold
/// independently loaded snapshots without sharing mutable state.
pub struct AuditLogger<S> {
    sink: S,
    fallback: FallbackLog,
    catalog: Arc<ErrorCatalog>,
    user_id: String,
    host_name: String,
    table_name: String,
}

impl<S: AuditSink> AuditLogger<S> {
    /// Create a logger writing through `sink`, falling back to `fallback`.
    pub fn new(
        sink: S,
        fallback: FallbackLog,
        catalog: Arc<ErrorCatalog>,
        user_id: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            fallback,
            catalog,
            user_id: user_id.into(),
            host_name: local_host_name(),
            table_name: table_name.into(),
        }
    }

    /// Resolve `symbol`, compose the entry, and persist it.
    ///
    /// Errors only for catalog inconsistencies: those are fatal to the
    /// job. Store failures fall back to the local log and return `Ok`.
    pub async fn log(
        &self,
        ctx: &JobContext,
        symbol: &str,
        details: EntryDetails,
    ) -> Result<()> {
        let definition = self.catalog.resolve(symbol)?;
        let severity = details.severity_override.unwrap_or(definition.severity);
        let message = self.catalog.format(symbol, &details.message_args)?;

        let now = Utc::now();
        let entry = AuditEntry {
            ctx_id: ctx.ctx_id,
            job_name: ctx.job_name.clone(),
            job_type: ctx.job_type.clone(),
            symbol: symbol.to_string(),
            severity,
            status: details.status,
            start_time: details.started_at.unwrap_or(now),
            end_time: details.ended_at,
            message,
            error_message: details.error_message,
            statement: details.statement.as_ref().map(|s| s.sql.clone()),
            parameters: details.statement.map(|s| s.parameters),
            artifact_name: details.artifact_name,
            user_id: self.user_id.clone(),
            host_name: self.host_name.clone(),
            table_name: self.table_name.clone(),
        };

        if let Err(error) = self.sink.append(&entry).await {
            tracing::error!(
                %error,
                symbol = %entry.symbol,
                ctx_id = %entry.ctx_id,
                "audit store write failed, using fallback log"
            );
            self.fallback.append(&entry);
        }
        Ok(())
    }
}

fn local_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}
