//! Batched ingestion-and-audit pipeline.
//!
//! This crate takes already-flattened, schema-mapped records and writes
//! them to a destination table in transactional batches, recording every
//! job step as a symbol-coded entry in an append-only logs table.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  MappedRecords   │  (from the upstream extractor)
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  RecordBatcher   │  fixed-size batches, remainder last, never empty
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   BatchWriter    │  one batch = one transaction; retry with backoff
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   AuditLogger    │  one entry per transition, correlated by ctx_id
//! └──────────────────┘
//! ```
//!
//! One job is one sequential pipeline: batch commit ordering and audit
//! entry ordering coincide, so the logs table is a faithful history.
//! Independent interfaces run as independent jobs sharing only the
//! connection pool and their read-only catalog snapshots.

pub mod audit;
pub mod batcher;
pub mod catalog_store;
pub mod config;
pub mod error;
pub mod job;
pub mod statement;
pub mod writer;

// Re-export commonly used types at crate root
pub use audit::{
    AuditEntry, AuditLogger, AuditSink, AuditStatus, EntryDetails, FallbackLog, JobContext,
    MemoryAuditSink, SqlAuditSink,
};
pub use batcher::RecordBatcher;
pub use config::{CatalogSourceType, DbType, InterfaceConfig, LogsSchema};
pub use error::{Error, Result};
pub use job::{CancelFlag, IngestionJob, JobOutcome, JobStatus};
pub use statement::{InsertStatement, SqlDialect, StatementSnapshot};
pub use writer::{
    BatchResult, BatchWriter, FailedBatch, InsertExecutor, RetryPolicy, SqlInsertExecutor,
    WriteError, WriteErrorKind,
};
