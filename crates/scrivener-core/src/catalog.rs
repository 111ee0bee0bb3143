//! Error catalog: the bounded taxonomy of operator-facing codes.
//!
//! Every audit entry references a symbol (e.g. `GS2002E`) that must exist in
//! the catalog. The catalog is loaded once per job from its backing store
//! (a JSON file here; the database loader lives in the ingest crate) and is
//! treated as an immutable snapshot for the remainder of the run, even if
//! the backing store changes concurrently.
//!
//! Symbols follow the `GS<nnnn><severity letter>` convention; the trailing
//! letter matches the definition's severity.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Well-known symbols used by the ingestion job controller.
///
/// The deployed catalog must define these; their templates take the argument
/// counts documented on each constant.
pub mod symbols {
    /// Job start. Template arguments: destination table name.
    pub const JOB_START: &str = "GS1001I";
    /// Batch committed. Template arguments: record count, destination table.
    pub const BATCH_COMMITTED: &str = "GS1002I";
    /// Job finished. Template arguments: final status.
    pub const JOB_FINISHED: &str = "GS1003I";
    /// Empty input sequence. Template arguments: destination table name.
    pub const NO_RECORDS: &str = "GS2001W";
    /// Batch insert failed. Template arguments: failure cause.
    pub const BATCH_FAILED: &str = "GS2002E";
}

/// Severity of a catalog entry, stored as its single-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Informational.
    #[serde(rename = "I")]
    Info,
    /// Warning.
    #[serde(rename = "W")]
    Warning,
    /// Error.
    #[serde(rename = "E")]
    Error,
}

impl Severity {
    /// The single-letter code persisted in the logs and error tables.
    pub fn as_letter(&self) -> &'static str {
        match self {
            Severity::Info => "I",
            Severity::Warning => "W",
            Severity::Error => "E",
        }
    }

    /// Parse a single-letter severity code.
    pub fn from_letter(value: &str) -> Result<Self> {
        match value {
            "I" => Ok(Severity::Info),
            "W" => Ok(Severity::Warning),
            "E" => Ok(Severity::Error),
            other => Err(Error::InvalidSeverity {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_letter())
    }
}

/// One entry of the error catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDefinition {
    /// Unique symbol, e.g. `GS2002E`.
    pub symbol: String,

    /// Severity recorded on audit entries logged under this symbol
    /// (unless the caller overrides it).
    pub severity: Severity,

    /// Description template with positional `{}` placeholders.
    /// `{{` and `}}` escape literal braces.
    pub description: String,

    /// Free-form grouping, e.g. `job` or `batch`.
    #[serde(default)]
    pub category: String,

    /// When set, downstream problem reporting is suppressed for entries
    /// logged under this symbol. Carried through to consumers; the
    /// ingestion path itself does not act on it.
    #[serde(default)]
    pub suppresses_reporting: bool,
}

/// An immutable snapshot of error definitions keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct ErrorCatalog {
    definitions: HashMap<String, ErrorDefinition>,
}

impl ErrorCatalog {
    /// Build a catalog from a definition list, rejecting duplicate symbols.
    pub fn from_definitions<I>(definitions: I) -> Result<Self>
    where
        I: IntoIterator<Item = ErrorDefinition>,
    {
        let mut map = HashMap::new();
        for definition in definitions {
            let symbol = definition.symbol.clone();
            if map.insert(symbol.clone(), definition).is_some() {
                return Err(Error::DuplicateSymbol { symbol });
            }
        }
        Ok(Self { definitions: map })
    }

    /// Load a catalog from a JSON file holding an array of definitions.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let definitions: Vec<ErrorDefinition> = serde_json::from_str(&raw)?;
        Self::from_definitions(definitions)
    }

    /// Resolve a symbol into its definition.
    ///
    /// An unknown symbol is an internal-consistency failure, never silently
    /// substituted: the caller is expected to abort the job.
    pub fn resolve(&self, symbol: &str) -> Result<&ErrorDefinition> {
        self.definitions
            .get(symbol)
            .ok_or_else(|| Error::UnknownSymbol {
                symbol: symbol.to_string(),
            })
    }

    /// Resolve a symbol and substitute positional arguments into its
    /// description template.
    pub fn format<S: AsRef<str>>(&self, symbol: &str, args: &[S]) -> Result<String> {
        let definition = self.resolve(symbol)?;
        let placeholders = count_placeholders(&definition.description);
        if placeholders != args.len() {
            return Err(Error::TemplateMismatch {
                symbol: symbol.to_string(),
                placeholders,
                supplied: args.len(),
            });
        }
        Ok(render_template(&definition.description, args))
    }

    /// Number of definitions in the snapshot.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the snapshot holds no definitions.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Iterate over all symbols in the snapshot (unordered).
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}

/// The reference definitions for the symbols in [`symbols`].
///
/// Deployments normally load the catalog from their error-definitions table
/// or file; this set seeds new installations and the test suite.
pub fn standard_definitions() -> Vec<ErrorDefinition> {
    fn def(
        symbol: &str,
        severity: Severity,
        description: &str,
        category: &str,
        suppresses_reporting: bool,
    ) -> ErrorDefinition {
        ErrorDefinition {
            symbol: symbol.to_string(),
            severity,
            description: description.to_string(),
            category: category.to_string(),
            suppresses_reporting,
        }
    }

    vec![
        def(
            symbols::JOB_START,
            Severity::Info,
            "ingestion job started for {}",
            "job",
            false,
        ),
        def(
            symbols::BATCH_COMMITTED,
            Severity::Info,
            "committed {} records to {}",
            "batch",
            false,
        ),
        def(
            symbols::JOB_FINISHED,
            Severity::Info,
            "ingestion job finished with status {}",
            "job",
            false,
        ),
        def(
            symbols::NO_RECORDS,
            Severity::Warning,
            "no records offered for {}",
            "job",
            true,
        ),
        def(
            symbols::BATCH_FAILED,
            Severity::Error,
            "batch insert failed: {}",
            "batch",
            false,
        ),
    ]
}

/// Count positional `{}` placeholders, honoring `{{`/`}}` escapes.
fn count_placeholders(template: &str) -> usize {
    let mut count = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => match chars.peek() {
                Some('{') => {
                    chars.next();
                }
                Some('}') => {
                    chars.next();
                    count += 1;
                }
                _ => {}
            },
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
            }
            _ => {}
        }
    }
    count
}

/// Substitute positional arguments into a template.
///
/// The caller has already checked that the argument count matches the
/// placeholder count.
fn render_template<S: AsRef<str>>(template: &str, args: &[S]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut next_arg = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => match chars.peek() {
                Some('{') => {
                    chars.next();
                    out.push('{');
                }
                Some('}') => {
                    chars.next();
                    if let Some(arg) = args.get(next_arg) {
                        out.push_str(arg.as_ref());
                    }
                    next_arg += 1;
                }
                _ => out.push('{'),
            },
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
                out.push('}');
            }
            _ => out.push(c),
        }
    }
    out
}
