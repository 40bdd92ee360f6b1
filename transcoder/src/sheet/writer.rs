//! CSV output of extracted sheets.

use std::io::Write;
use std::path::Path;

use super::Sheet;
use crate::error::{SheetError, SheetResult};

/// Write `sheet` (category row, field row, data rows) to `out`.
pub fn write_csv<W: Write>(sheet: &Sheet, out: W, delimiter: u8) -> SheetResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(out);
    for row in sheet.to_rows() {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn to_csv_string(sheet: &Sheet, delimiter: u8) -> SheetResult<String> {
    let mut buffer = Vec::new();
    write_csv(sheet, &mut buffer, delimiter)?;
    String::from_utf8(buffer).map_err(|e| SheetError::Encoding(e.to_string()))
}

pub fn write_csv_file(sheet: &Sheet, path: &Path, delimiter: u8) -> SheetResult<()> {
    let file = std::fs::File::create(path)?;
    write_csv(sheet, std::io::BufWriter::new(file), delimiter)?;
    tracing::info!(sheet = %sheet.name, path = %path.display(), rows = sheet.rows.len(), "wrote sheet");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnKey;
    use crate::sheet::reader::csv_from_bytes;

    fn sheet() -> Sheet {
        Sheet {
            name: "Avails".into(),
            columns: ["Avail:ALID", "AvailTrans:Territory", "AvailTrans:Start"]
                .iter()
                .map(|k| ColumnKey::parse(k).unwrap())
                .collect(),
            rows: vec![vec!["A1".into(), "US, CA".into(), "2020-01-01".into()]],
        }
    }

    #[test]
    fn test_csv_layout() {
        let text = to_csv_string(&sheet(), b';').unwrap();
        assert_eq!(
            text,
            "Avail;AvailTrans;\nALID;Territory;Start\nA1;US, CA;2020-01-01\n"
        );
    }

    #[test]
    fn test_written_csv_reads_back() {
        let text = to_csv_string(&sheet(), b',').unwrap();
        let rows: Vec<Vec<String>> = csv_from_bytes("avails", text.as_bytes())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows[2][1], "US, CA");
        assert_eq!(rows[0][2], "");
    }
}
