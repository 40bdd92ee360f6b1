//! Per-document build log.
//!
//! Every message the transcoder produces about the data (bad cells,
//! inconsistent rows, ambiguous XML) is collected as a [`LogEntry`] with
//! its location, so callers can show or export them. Each entry is also
//! emitted as a `tracing` event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log level for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Where a message points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Location {
    /// Spreadsheet cell (1-based row); `column` absent for whole-row messages.
    Cell { row: usize, column: Option<String> },
    /// XML element path.
    Node { path: String },
}

impl Location {
    pub fn row(row: usize) -> Self {
        Location::Cell { row, column: None }
    }

    pub fn cell(row: usize, column: impl Into<String>) -> Self {
        Location::Cell {
            row,
            column: Some(column.into()),
        }
    }

    pub fn node(path: impl Into<String>) -> Self {
        Location::Node { path: path.into() }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Cell { row, column: Some(column) } => write!(f, "row {}, column {}", row, column),
            Location::Cell { row, column: None } => write!(f, "row {}", row),
            Location::Node { path } => write!(f, "{}", path),
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Info, message: message.into(), location: None }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Success, message: message.into(), location: None }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Warning, message: message.into(), location: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Error, message: message.into(), location: None }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "[{}] {}", location, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Ordered collection of entries for one document build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildLog {
    entries: Vec<LogEntry>,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry and mirror it to `tracing`.
    pub fn log(&mut self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info | LogLevel::Success => tracing::info!("{}", entry),
            LogLevel::Warning => tracing::warn!("{}", entry),
            LogLevel::Error => tracing::error!("{}", entry),
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.level == LogLevel::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.level == LogLevel::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
