//! scrivener ingestion runner.
//!
//! Runs one ingestion job for one interface: reads already-mapped records
//! (one flat JSON object per line), writes them to the interface's
//! destination table in transactional batches, and records the audit trail
//! in the logs table.
//!
//! # Usage
//!
//! ```bash
//! scrivener-ingest \
//!     --config interfaces/mist-ams/control-file.json \
//!     --input /data/inbox/customers-0042.jsonl
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) requests cooperative cancellation: the in-flight batch
//! commits or fails normally, the job stops at the next batch boundary,
//! and the terminal audit entry is still written.

use anyhow::{Context, Result};
use clap::Parser;
use scrivener_core::MappedRecord;
use scrivener_ingest::{
    catalog_store, AuditLogger, BatchWriter, CancelFlag, FallbackLog, IngestionJob,
    InterfaceConfig, JobStatus, RetryPolicy, SqlAuditSink, SqlDialect, SqlInsertExecutor,
};
use sqlx::postgres::PgPoolOptions;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// scrivener ingestion runner.
#[derive(Parser, Debug)]
#[command(name = "scrivener-ingest")]
#[command(about = "Batched record ingestion with a symbol-coded audit trail")]
#[command(version)]
struct Args {
    /// Interface control file (JSON)
    #[arg(long, short)]
    config: PathBuf,

    /// Input file of mapped records, one JSON object per line
    #[arg(long, short)]
    input: PathBuf,

    /// Artifact name recorded on audit entries (defaults to the input file name)
    #[arg(long)]
    artifact_name: Option<String>,

    /// Fallback audit log path used when the logs store is unreachable
    #[arg(long, default_value = "fallback_logs.json")]
    fallback_log: PathBuf,

    /// Maximum connections in the destination pool
    #[arg(long, default_value = "5")]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("scrivener_ingest=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("scrivener ingestion starting...");

    let config = InterfaceConfig::from_path(&args.config)
        .with_context(|| format!("failed to load control file {}", args.config.display()))?;
    config
        .validate()
        .context("invalid interface configuration")?;

    // Set up cooperative cancellation
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received, finishing the current batch...");
        handler_flag.cancel();
    })
    .context("failed to set Ctrl+C handler")?;

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .connect(&config.connect_url())
        .await
        .context("failed to connect to the destination database")?;

    let catalog = Arc::new(
        catalog_store::load_catalog(&pool, &config)
            .await
            .context("failed to load the error catalog")?,
    );

    let records = read_records(&args.input)?;
    tracing::info!(
        records = records.len(),
        input = %args.input.display(),
        "input records loaded"
    );

    let artifact_name = args.artifact_name.clone().or_else(|| {
        args.input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    });

    let writer = BatchWriter::new(
        SqlInsertExecutor::new(pool.clone()),
        SqlDialect::Postgres,
        RetryPolicy::default(),
    );
    let audit_sink = SqlAuditSink::new(pool.clone(), &config.logs_table_name, &config.logs_schema)?;
    let audit = AuditLogger::new(
        audit_sink,
        FallbackLog::new(&args.fallback_log),
        Arc::clone(&catalog),
        config.user.clone(),
        config.table_name.clone(),
    );

    let job = IngestionJob::new(config, writer, audit, cancel)?;
    let outcome = job.run(records, artifact_name).await?;

    // Print summary
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("JOB COMPLETE: {}", outcome.status);
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Context id:           {}", outcome.ctx_id);
    tracing::info!("Records offered:      {}", outcome.records_offered);
    tracing::info!("Records committed:    {}", outcome.records_committed);
    tracing::info!("Batches attempted:    {}", outcome.batches_attempted);
    tracing::info!("Batches failed:       {}", outcome.batches_failed);

    match outcome.status {
        JobStatus::Success | JobStatus::NoRecords => Ok(()),
        JobStatus::Partial => std::process::exit(2),
        JobStatus::Failure => std::process::exit(1),
    }
}

/// Read mapped records from a JSONL file: one flat JSON object per line,
/// keys already translated to destination column names.
fn read_records(path: &Path) -> Result<Vec<MappedRecord>> {
    let file =
        File::open(path).with_context(|| format!("failed to open input {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", line_num + 1))?;
        let object = value
            .as_object()
            .with_context(|| format!("line {}: expected a JSON object", line_num + 1))?;
        records.push(MappedRecord::from_json_object(object));
    }
    Ok(records)
}
