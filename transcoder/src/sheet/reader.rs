//! Spreadsheet row sources with encoding and delimiter auto-detection.
//!
//! CSV files are read whole (encoding detection needs the bytes), decoded,
//! then parsed record by record. XLSX sheets are read through `calamine`.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::Timelike;

use crate::error::{SheetError, SheetResult};

/// Candidate CSV delimiters, in tie-break order.
const DELIMITERS: [char; 4] = [';', ',', '\t', '|'];

enum Rows {
    Csv(csv::StringRecordsIntoIter<Cursor<Vec<u8>>>),
    Table(std::vec::IntoIter<Vec<String>>),
}

/// Rows of one sheet, in order, as plain strings.
pub struct SheetSource {
    /// Sheet name (file stem for CSV).
    pub name: String,
    /// Detected encoding (CSV only).
    pub encoding: Option<String>,
    /// Detected delimiter (CSV only).
    pub delimiter: Option<char>,
    rows: Rows,
}

impl Iterator for SheetSource {
    type Item = SheetResult<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.rows {
            Rows::Csv(records) => records
                .next()
                .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()).map_err(SheetError::from)),
            Rows::Table(rows) => rows.next().map(Ok),
        }
    }
}

// =============================================================================
// Detection
// =============================================================================

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other => other.to_string(),
    }
}

/// Decode bytes with the given encoding. Unknown encodings fall back to
/// lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> SheetResult<String> {
    let text = match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => text,
            Err(_) => String::from_utf8_lossy(bytes).into_owned(),
        },
        "iso-8859-1" | "latin-1" | "latin1" | "windows-1252" | "cp1252" => {
            let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
            if had_errors {
                return Err(SheetError::Encoding(format!("invalid {} content", encoding)));
            }
            text.into_owned()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let mut best = DELIMITERS[0];
    let mut best_count = 0;
    for sep in DELIMITERS {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best = sep;
        }
    }
    best
}

// =============================================================================
// Sources
// =============================================================================

/// CSV rows from raw bytes.
pub fn csv_from_bytes(name: &str, bytes: &[u8]) -> SheetResult<SheetSource> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(SheetError::Empty);
    }
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding)?;
    let delimiter = detect_delimiter(&content);
    tracing::debug!(%encoding, delimiter = ?delimiter, "detected CSV layout");

    let records = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(Cursor::new(content.into_bytes()))
        .into_records();

    Ok(SheetSource {
        name: name.to_string(),
        encoding: Some(encoding),
        delimiter: Some(delimiter),
        rows: Rows::Csv(records),
    })
}

pub fn open_csv(path: &Path) -> SheetResult<SheetSource> {
    let bytes = std::fs::read(path)?;
    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("sheet");
    csv_from_bytes(name, &bytes)
}

/// Rows of the named sheet, or of the first sheet.
pub fn open_xlsx(path: &Path, sheet: Option<&str>) -> SheetResult<SheetSource> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|e: calamine::XlsxError| SheetError::Excel(e.to_string()))?;

    let name = match sheet {
        Some(name) => name.to_string(),
        None => workbook.sheet_names().first().cloned().ok_or(SheetError::Empty)?,
    };
    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| SheetError::Excel(e.to_string()))?;

    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    if rows.is_empty() {
        return Err(SheetError::Empty);
    }
    tracing::debug!(sheet = %name, rows = rows.len(), "read workbook sheet");

    Ok(SheetSource {
        name,
        encoding: None,
        delimiter: None,
        rows: Rows::Table(rows.into_iter()),
    })
}

/// Open by extension: `.csv`/`.txt` or `.xlsx`/`.xlsm`.
pub fn open(path: &Path, sheet: Option<&str>) -> SheetResult<SheetSource> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "csv" | "txt" | "tsv" => open_csv(path),
        "xlsx" | "xlsm" => open_xlsx(path, sheet),
        other => Err(SheetError::UnsupportedFormat(other.to_string())),
    }
}

/// Whole floats without decimals, dates as ISO dates.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if value.num_seconds_from_midnight() == 0 => value.date().to_string(),
            Some(value) => value.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}
