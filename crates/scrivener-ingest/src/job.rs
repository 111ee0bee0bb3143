//! Ingestion job controller.
//!
//! Orchestrates one interface run: opens the job context, drives the
//! batcher/writer loop over the input records, emits one audit entry per
//! transition, and reduces the per-batch results into the final status.
//!
//! A batch failure does not halt the run: the controller continues to the
//! next batch and accounts for the failure at job end. Only fatal
//! conditions (configuration defects, catalog inconsistencies, programming
//! errors from the writer) abort the run.

use crate::audit::{AuditLogger, AuditSink, AuditStatus, EntryDetails, JobContext};
use crate::batcher::RecordBatcher;
use crate::config::InterfaceConfig;
use crate::error::Result;
use crate::writer::{BatchResult, BatchWriter, InsertExecutor};
use chrono::Utc;
use scrivener_core::{symbols, MappedRecord, Severity};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Cooperative cancellation signal, checked between batches.
///
/// An in-flight batch always completes or fails normally; cancellation
/// never leaves a batch half-committed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Every attempted batch committed.
    Success,
    /// Some batches committed, some failed.
    Partial,
    /// At least one batch was attempted and none committed.
    Failure,
    /// The input sequence was empty. A warning, not an error.
    NoRecords,
}

impl JobStatus {
    /// Status token used in messages and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "SUCCESS",
            JobStatus::Partial => "PARTIAL",
            JobStatus::Failure => "FAILURE",
            JobStatus::NoRecords => "NO RECORDS",
        }
    }

    fn audit_status(self) -> AuditStatus {
        match self {
            JobStatus::Success => AuditStatus::Success,
            JobStatus::Partial => AuditStatus::Partial,
            JobStatus::Failure => AuditStatus::Failure,
            JobStatus::NoRecords => AuditStatus::NoRecords,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate of one run. Never persisted as its own entity; the terminal
/// audit entry's status field carries the final status.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Correlation identifier of the run, for querying its audit trail.
    pub ctx_id: Uuid,
    /// Final status.
    pub status: JobStatus,
    /// Records pulled from the input sequence.
    pub records_offered: usize,
    /// Records committed to the destination table.
    pub records_committed: usize,
    /// Batches handed to the writer.
    pub batches_attempted: usize,
    /// Batches that failed after retry.
    pub batches_failed: usize,
}

fn reduce_status(batches_attempted: usize, batches_failed: usize) -> JobStatus {
    if batches_attempted == 0 {
        JobStatus::NoRecords
    } else if batches_failed == 0 {
        JobStatus::Success
    } else if batches_failed == batches_attempted {
        JobStatus::Failure
    } else {
        JobStatus::Partial
    }
}

/// One configured ingestion run: batcher → writer → audit, in order, so the
/// audit trail is a faithful history of commit ordering.
pub struct IngestionJob<E, A> {
    config: InterfaceConfig,
    writer: BatchWriter<E>,
    audit: AuditLogger<A>,
    cancel: CancelFlag,
}

impl<E: InsertExecutor, A: AuditSink> IngestionJob<E, A> {
    /// Assemble a job, validating the configuration up front.
    pub fn new(
        config: InterfaceConfig,
        writer: BatchWriter<E>,
        audit: AuditLogger<A>,
        cancel: CancelFlag,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            writer,
            audit,
            cancel,
        })
    }

    /// Run the job over a finite record sequence.
    pub async fn run<I>(&self, records: I, artifact_name: Option<String>) -> Result<JobOutcome>
    where
        I: IntoIterator<Item = MappedRecord>,
    {
        let ctx = JobContext::new(
            format!("{} BATCH INS", self.config.table_name),
            self.config.interface_type.clone(),
        );
        tracing::info!(
            ctx_id = %ctx.ctx_id,
            interface = %self.config.interface_type,
            table = %self.config.table_name,
            batch_size = self.config.sql_batch_size,
            "ingestion job started"
        );

        self.audit
            .log(
                &ctx,
                symbols::JOB_START,
                EntryDetails {
                    status: AuditStatus::InProgress,
                    message_args: vec![self.config.table_name.clone()],
                    started_at: Some(ctx.started_at),
                    artifact_name: artifact_name.clone(),
                    ..Default::default()
                },
            )
            .await?;

        let batcher = RecordBatcher::new(records.into_iter(), self.config.sql_batch_size)?;

        let mut results: Vec<BatchResult> = Vec::new();
        let mut records_offered = 0usize;
        let mut cancelled = false;

        for batch in batcher {
            if self.cancel.is_cancelled() {
                cancelled = true;
                tracing::warn!(
                    ctx_id = %ctx.ctx_id,
                    "cancellation requested, stopping before the next batch"
                );
                break;
            }

            records_offered += batch.len();
            let batch_started = Utc::now();
            let result = self.writer.write(&batch, &self.config.table_name).await?;

            match &result.failure {
                None => {
                    self.audit
                        .log(
                            &ctx,
                            symbols::BATCH_COMMITTED,
                            EntryDetails {
                                status: AuditStatus::Success,
                                message_args: vec![
                                    result.committed_count.to_string(),
                                    self.config.table_name.clone(),
                                ],
                                started_at: Some(batch_started),
                                ended_at: Some(Utc::now()),
                                artifact_name: artifact_name.clone(),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                Some(failure) => {
                    self.audit
                        .log(
                            &ctx,
                            symbols::BATCH_FAILED,
                            EntryDetails {
                                status: AuditStatus::Failure,
                                message_args: vec![failure.cause.to_string()],
                                started_at: Some(batch_started),
                                ended_at: Some(Utc::now()),
                                error_message: Some(failure.cause.to_string()),
                                statement: Some(failure.statement.clone()),
                                artifact_name: artifact_name.clone(),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
            }
            results.push(result);
        }

        let batches_attempted = results.len();
        let batches_failed = results.iter().filter(|r| !r.is_committed()).count();
        let records_committed = results.iter().map(|r| r.committed_count).sum();
        let status = reduce_status(batches_attempted, batches_failed);

        let cancellation_note =
            cancelled.then(|| "run cancelled before input exhaustion".to_string());
        match status {
            JobStatus::NoRecords => {
                self.audit
                    .log(
                        &ctx,
                        symbols::NO_RECORDS,
                        EntryDetails {
                            status: AuditStatus::NoRecords,
                            message_args: vec![self.config.table_name.clone()],
                            started_at: Some(ctx.started_at),
                            ended_at: Some(Utc::now()),
                            error_message: cancellation_note,
                            artifact_name: artifact_name.clone(),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            _ => {
                self.audit
                    .log(
                        &ctx,
                        symbols::JOB_FINISHED,
                        EntryDetails {
                            status: status.audit_status(),
                            severity_override: match status {
                                JobStatus::Failure => Some(Severity::Error),
                                JobStatus::Partial => Some(Severity::Warning),
                                _ => None,
                            },
                            message_args: vec![status.to_string()],
                            started_at: Some(ctx.started_at),
                            ended_at: Some(Utc::now()),
                            error_message: cancellation_note,
                            artifact_name: artifact_name.clone(),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        tracing::info!(
            ctx_id = %ctx.ctx_id,
            status = %status,
            records_offered,
            records_committed,
            batches_attempted,
            batches_failed,
            "ingestion job finished"
        );

        Ok(JobOutcome {
            ctx_id: ctx.ctx_id,
            status,
            records_offered,
            records_committed,
            batches_attempted,
            batches_failed,
        })
    }
}
