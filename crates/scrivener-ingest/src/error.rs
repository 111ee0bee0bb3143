//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
///
/// Expected per-batch database failures do NOT surface here; the batch
/// writer folds them into a failed `BatchResult` so the job can continue.
/// This enum carries the fatal conditions: configuration defects, catalog
/// inconsistencies, and programming errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Core data-model or catalog error (unknown symbol, template
    /// mismatch, empty batch).
    #[error(transparent)]
    Core(#[from] scrivener_core::Error),

    /// Database error outside the per-batch write path (pool setup,
    /// catalog loading, audit-schema validation).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A batch write failed with a programming error (e.g. malformed SQL
    /// from a bad mapping); retry is pointless and the job must stop.
    #[error("fatal write error: {0}")]
    FatalWrite(crate::writer::WriteError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Batch size outside the accepted range.
    #[error("invalid batch size {size}; sqlBatchSize must be a positive integer")]
    InvalidBatchSize {
        /// The rejected size.
        size: usize,
    },

    /// A table or column name that cannot be used in a statement.
    #[error("invalid SQL identifier '{name}'")]
    InvalidIdentifier {
        /// The rejected identifier.
        name: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
