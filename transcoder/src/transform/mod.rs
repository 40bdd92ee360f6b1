//! Transcoding engine.
//!
//! - Ingest: spreadsheet rows to an Avails document
//! - Assembler: entity registries and final document layout
//! - Extract: Avails document to spreadsheet rows
//! - Terms: Transaction Term rules shared by both directions
//! - Pipeline: file-level entry points

pub mod assembler;
pub mod extract;
pub mod ingest;
pub mod pipeline;
pub mod terms;

pub use extract::{ExtractOptions, ExtractOutcome, Extractor};
pub use ingest::{ingest_rows, IngestOptions, IngestOutcome, IngestStats, Ingester, RowFlow};
pub use pipeline::*;
