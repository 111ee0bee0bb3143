//! Error types shared across the scrivener pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core data model and error catalog.
#[derive(Error, Debug)]
pub enum Error {
    /// A symbol was looked up that the catalog snapshot does not contain.
    ///
    /// This is a configuration or programming defect: the audit trail cannot
    /// be trusted once a step logs under an unregistered code, so callers
    /// must treat this as fatal rather than substituting a placeholder.
    #[error("unknown error symbol '{symbol}'")]
    UnknownSymbol {
        /// The symbol that was requested.
        symbol: String,
    },

    /// A description template was formatted with the wrong number of arguments.
    #[error(
        "template for '{symbol}' takes {placeholders} argument(s), {supplied} supplied"
    )]
    TemplateMismatch {
        /// The symbol whose template was being formatted.
        symbol: String,
        /// Number of positional placeholders in the template.
        placeholders: usize,
        /// Number of arguments the caller supplied.
        supplied: usize,
    },

    /// Two definitions in a catalog source share the same symbol.
    #[error("duplicate error symbol '{symbol}' in catalog source")]
    DuplicateSymbol {
        /// The symbol that appeared more than once.
        symbol: String,
    },

    /// A severity code outside the known `I`/`W`/`E` set.
    #[error("invalid severity code '{value}' (expected I, W or E)")]
    InvalidSeverity {
        /// The rejected severity code.
        value: String,
    },

    /// A batch was constructed from zero records.
    #[error("a batch must contain at least one record")]
    EmptyBatch,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
