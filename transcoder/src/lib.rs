//! # Avails - spreadsheet / XML transcoding for digital distribution avails
//!
//! Converts Avails spreadsheets (CSV, XLSX) into Avails XML documents and
//! back, driven by versioned JSON mapping files that tie each spreadsheet
//! column to a path in the XML.
//!
//! ## Architecture
//!
//! ```text
//!                   ┌──────────────┐
//!                   │   Mapping    │  (avails-2.2.json, avails-2.3.json, ...)
//!                   │   Catalog    │
//!                   └──────┬───────┘
//!                          │
//! ┌─────────────┐   ┌──────▼───────┐   ┌─────────────┐
//! │ CSV / XLSX  │──▶│    Ingest    │──▶│ Avails XML  │
//! │ (auto-enc)  │   │ (Assembler)  │   │ (AvailList) │
//! └─────────────┘   └──────────────┘   └──────┬──────┘
//!        ▲                                    │
//!        │          ┌──────────────┐          │
//!        └──────────│   Extract    │◀─────────┘
//!                   └──────────────┘
//! ```
//!
//! Both directions produce a [`BuildLog`] of located messages and a
//! provenance table linking every output value to its source.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use avails::{pipeline, IngestOptions, MappingCatalog, StaticSchema};
//! use std::path::Path;
//!
//! let catalog = MappingCatalog::builtin()?;
//! let spec = catalog.latest().expect("built-in mappings");
//! let outcome = pipeline::ingest_path(
//!     Path::new("avails.csv"),
//!     None,
//!     &spec,
//!     &StaticSchema::avails(),
//!     IngestOptions::default(),
//! )?;
//! for entry in outcome.log.entries() {
//!     eprintln!("{}", entry);
//! }
//! println!("{}", pipeline::render_xml(&outcome)?);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Column keys and categories
//! - [`mapping`] - Mapping documents, path expressions, transform functions
//! - [`sheet`] - CSV / XLSX reading and CSV writing
//! - [`xml`] - Arena XML document, reader and writer
//! - [`transform`] - Ingestion, extraction and pipeline
//! - [`convert`] - Scalar conversions
//! - [`schema`] - Schema introspection
//! - [`validation`] - Mapping document validation
//! - [`report`] - Build log
//! - [`provenance`] - Output-to-source links

// Core modules
pub mod error;
pub mod logging;
pub mod models;

// Mapping
pub mod mapping;
pub mod schema;
pub mod validation;

// Formats
pub mod sheet;
pub mod xml;

// Transformation
pub mod convert;
pub mod provenance;
pub mod report;
pub mod transform;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    MappingError, MappingResult, PathError, RowError, SheetError, SheetResult, TranscodeError,
    TranscodeResult, XmlError, XmlResult,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{avail_type_for, Category, ColumnKey, Scope};

// =============================================================================
// Re-exports - Mapping
// =============================================================================

pub use mapping::{MappingCatalog, MappingEntry, MappingRule, MappingSpec, SheetLayout, TransformKind};
pub use schema::{SchemaIntrospection, StaticSchema, TypeTag};
pub use validation::{is_valid, validate, validate_mapping};

// =============================================================================
// Re-exports - Formats
// =============================================================================

pub use sheet::{Sheet, SheetSource};
pub use xml::{NodeId, XmlDocument};

// =============================================================================
// Re-exports - Engine
// =============================================================================

pub use provenance::{CellAddress, CellRef, ExtractProvenance, IngestProvenance, ProvenanceSink, XmlRef};
pub use report::{BuildLog, Location, LogEntry, LogLevel};
pub use transform::{
    ingest_rows, pipeline, ExtractOptions, ExtractOutcome, Extractor, IngestOptions, IngestOutcome,
    IngestStats, Ingester, RowFlow,
};
