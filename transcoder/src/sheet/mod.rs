//! Spreadsheet input and output.
//!
//! Avails spreadsheets carry a two-row composite header (category row,
//! field row) followed by data rows. Readers hand rows out as plain
//! `Vec<String>` without interpreting the headers; the ingester does that.

pub mod reader;
pub mod writer;

use serde::Serialize;

use crate::models::ColumnKey;

pub use reader::{open, SheetSource};
pub use writer::{to_csv_string, write_csv, write_csv_file};

/// 1-based sheet row of the first data row, after the two header rows.
pub const FIRST_DATA_ROW: usize = 3;

/// A named table of rows under mapping column keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<ColumnKey>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    /// Cell by data-row index and column key.
    pub fn cell(&self, row: usize, key: &str) -> Option<&str> {
        let col = self.columns.iter().position(|c| c.as_str() == key)?;
        self.rows.get(row).and_then(|r| r.get(col)).map(String::as_str)
    }

    /// Header rows followed by the data rows, as a reader would return them.
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        let mut previous = None;
        let categories = self
            .columns
            .iter()
            .map(|c| {
                let category = c.category().as_str();
                if previous == Some(category) {
                    String::new()
                } else {
                    previous = Some(category);
                    category.to_string()
                }
            })
            .collect();
        let fields = self.columns.iter().map(|c| c.field().to_string()).collect();

        let mut rows = Vec::with_capacity(self.rows.len() + 2);
        rows.push(categories);
        rows.push(fields);
        rows.extend(self.rows.iter().cloned());
        rows
    }
}
