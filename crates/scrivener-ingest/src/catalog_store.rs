//! Catalog snapshot loading.
//!
//! The error catalog is read once per job from the source the interface
//! configuration names (a table in the destination database, or a local
//! JSON file) and injected into the job as an immutable snapshot. Later
//! changes to the backing store do not affect a running job.

use crate::config::{CatalogSourceType, InterfaceConfig};
use crate::error::Result;
use crate::statement::validate_identifier;
use scrivener_core::{ErrorCatalog, ErrorDefinition, Severity};
use sqlx::{PgPool, Row};

/// Load the catalog snapshot for one job, per the interface configuration.
pub async fn load_catalog(pool: &PgPool, config: &InterfaceConfig) -> Result<ErrorCatalog> {
    let catalog = match config.error_definition_source_type {
        CatalogSourceType::File => {
            ErrorCatalog::load_from_path(&config.error_definition_source_location)?
        }
        CatalogSourceType::Db => {
            load_from_table(pool, &config.error_definition_source_location).await?
        }
    };
    tracing::info!(
        definitions = catalog.len(),
        source = %config.error_definition_source_location,
        "error catalog snapshot loaded"
    );
    Ok(catalog)
}

/// Load definitions from an error-definitions table.
///
/// Expected columns: `symb`, `svrt` (single letter), `dscr`, `ctgry`,
/// `sprs_rpt`.
pub async fn load_from_table(pool: &PgPool, table: &str) -> Result<ErrorCatalog> {
    validate_identifier(table)?;
    let sql = format!("SELECT symb, svrt, dscr, ctgry, sprs_rpt FROM {table}");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut definitions = Vec::with_capacity(rows.len());
    for row in rows {
        let severity: String = row.try_get("svrt")?;
        definitions.push(ErrorDefinition {
            symbol: row.try_get("symb")?,
            severity: Severity::from_letter(&severity)?,
            description: row.try_get("dscr")?,
            category: row.try_get("ctgry")?,
            suppresses_reporting: row.try_get("sprs_rpt")?,
        });
    }
    Ok(ErrorCatalog::from_definitions(definitions)?)
}
