//! Core types and the error catalog for the scrivener ingestion pipeline.
//!
//! This crate provides:
//! - The mapped-record data model ([`MappedRecord`], [`ScalarValue`], [`Batch`])
//! - The error catalog ([`ErrorCatalog`]): symbol-coded definitions with
//!   severity and description templates
//! - Shared error types
//!
//! It deliberately carries no database dependencies; everything that talks
//! to a store lives in `scrivener-ingest`.

mod catalog;
mod error;
mod record;

pub use catalog::{
    standard_definitions, symbols, ErrorCatalog, ErrorDefinition, Severity,
};
pub use error::{Error, Result};
pub use record::{Batch, MappedRecord, ScalarValue};
