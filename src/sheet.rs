//! Tabular file reading for score uploads.
//!
//! Accepts `.xlsx` (first worksheet only) and `.csv`. Rows are keyed by
//! header with absent cells default-filled to the empty string, because
//! column inference inspects key presence and the validator treats an empty
//! cell as a zero score.

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook, Data, Reader, Xlsx};

use crate::config::{MAX_UPLOAD_BYTES, UPLOAD_EXTENSIONS};

#[derive(Debug, Clone)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<HashMap<String, String>>,
}

/// Reject unsupported extensions and oversized files before any parsing.
pub fn check_upload_constraints(path: &Path, size: u64) -> anyhow::Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !UPLOAD_EXTENSIONS.contains(&ext.as_str()) {
        anyhow::bail!(
            "unsupported file type .{}; expected one of: {}",
            ext,
            UPLOAD_EXTENSIONS
                .map(|e| format!(".{}", e))
                .join(", ")
        );
    }
    if size > MAX_UPLOAD_BYTES {
        anyhow::bail!(
            "file is {} bytes; the limit is {} bytes",
            size,
            MAX_UPLOAD_BYTES
        );
    }
    Ok(())
}

pub fn read_table(path: &Path) -> anyhow::Result<SheetTable> {
    let size = std::fs::metadata(path)?.len();
    check_upload_constraints(path, size)?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" => read_xlsx(path),
        "csv" => read_csv(path),
        _ => unreachable!("extension already checked"),
    }
}

fn read_xlsx(path: &Path) -> anyhow::Result<SheetTable> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("workbook contains no sheets"))?;
    let range = workbook.worksheet_range(&sheet_name)?;

    let mut rows_iter = range.rows();
    let header_row = rows_iter
        .next()
        .ok_or_else(|| anyhow::anyhow!("file has no header row"))?;
    let headers: Vec<String> = header_row
        .iter()
        .map(|c| cell_to_string(c).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for row in rows_iter {
        let mut map = HashMap::with_capacity(headers.len());
        for (i, h) in headers.iter().enumerate() {
            let value = row.get(i).map(cell_to_string).unwrap_or_default();
            map.insert(h.clone(), value);
        }
        rows.push(map);
    }

    Ok(SheetTable { headers, rows })
}

fn read_csv(path: &Path) -> anyhow::Result<SheetTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_path(path)?;

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    if headers.is_empty() {
        anyhow::bail!("file has no header row");
    }

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let mut map = HashMap::with_capacity(headers.len());
        for (i, h) in headers.iter().enumerate() {
            let value = record.get(i).unwrap_or("").to_string();
            map.insert(h.clone(), value);
        }
        rows.push(map);
    }

    Ok(SheetTable { headers, rows })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            // Excel stores most numbers as floats; render integral values
            // without a trailing ".0" so numeric coercion sees "30", not "30.0".
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "reportcardd-sheet-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let p = dir.join(name);
        std::fs::write(&p, contents).expect("write temp file");
        p
    }

    #[test]
    fn csv_rows_keyed_by_header_with_empty_fill() {
        let p = temp_file(
            "scores.csv",
            "STUDENT REGISTER ID,STUDENT NAME,TEST 1,EXAM\nS1,Ann,30,\nS2,Ben\n",
        );
        let table = read_table(&p).expect("read csv");
        assert_eq!(
            table.headers,
            vec!["STUDENT REGISTER ID", "STUDENT NAME", "TEST 1", "EXAM"]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0]["TEST 1"], "30");
        assert_eq!(table.rows[0]["EXAM"], "");
        // Short row: missing trailing cells are filled, not omitted.
        assert_eq!(table.rows[1]["TEST 1"], "");
        assert_eq!(table.rows[1]["EXAM"], "");
    }

    #[test]
    fn header_only_csv_yields_zero_rows() {
        let p = temp_file("empty.csv", "STUDENT REGISTER ID,STUDENT NAME,EXAM\n");
        let table = read_table(&p).expect("read csv");
        assert_eq!(table.rows.len(), 0);
        assert_eq!(table.headers.len(), 3);
    }

    #[test]
    fn unsupported_extension_rejected() {
        let p = temp_file("scores.xls", "a,b\n1,2\n");
        let e = read_table(&p).unwrap_err();
        assert!(e.to_string().contains("unsupported file type"));
    }

    #[test]
    fn size_limit_enforced_before_parsing() {
        let p = PathBuf::from("scores.csv");
        assert!(check_upload_constraints(&p, MAX_UPLOAD_BYTES).is_ok());
        let e = check_upload_constraints(&p, MAX_UPLOAD_BYTES + 1).unwrap_err();
        assert!(e.to_string().contains("limit"));
    }

    #[test]
    fn float_cells_render_integers_cleanly() {
        assert_eq!(cell_to_string(&Data::Float(30.0)), "30");
        assert_eq!(cell_to_string(&Data::Float(30.5)), "30.5");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }
}
