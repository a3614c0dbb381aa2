//! Row validation: turns a parsed sheet plus inferred columns into
//! `StudentRecord`s and a list of cell-level validation errors.
//!
//! Shared by the single-subject and bulk upload paths so the two cannot
//! drift apart.

use serde::Serialize;

use crate::columns::InferredColumns;
use crate::sheet::SheetTable;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub student_id: String,
    pub name: String,
    /// Assessment label -> score, in sheet column order. Order matters
    /// downstream: the first exam-like entry wins when several exist.
    pub scores: Vec<(String, f64)>,
    pub term: String,
    pub academic_year: String,
    pub attendance: Option<i64>,
}

impl StudentRecord {
    pub fn score(&self, label: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// 1-based spreadsheet row (header row is row 1, first data row is 2).
    pub row: usize,
    /// Header name, or the literal `"File"` for file-scoped problems.
    pub column: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseOutcome {
    pub records: Vec<StudentRecord>,
    pub errors: Vec<ValidationError>,
    pub is_valid: bool,
}

pub struct RowContext<'a> {
    pub default_term: &'a str,
    pub default_year: &'a str,
}

pub fn validate_rows(
    table: &SheetTable,
    cols: &InferredColumns,
    ctx: &RowContext<'_>,
) -> ParseOutcome {
    let mut records = Vec::new();
    let mut errors = Vec::new();

    if table.rows.is_empty() {
        errors.push(ValidationError {
            row: 1,
            column: "File".to_string(),
            message: "File contains no data rows".to_string(),
        });
        return ParseOutcome {
            records,
            errors,
            is_valid: false,
        };
    }

    for (i, row) in table.rows.iter().enumerate() {
        let row_no = i + 2;
        let student_id = cell(row, &cols.id_column);
        let name = cell(row, &cols.name_column);
        // Blank trailing rows are common; a row without both id and name is
        // skipped silently rather than reported.
        if student_id.is_empty() || name.is_empty() {
            continue;
        }

        let mut scores = Vec::with_capacity(cols.assessment_columns.len());
        for col in &cols.assessment_columns {
            let raw = cell(row, col);
            if raw.is_empty() {
                // Missing assessment means zero, not "no data".
                scores.push((col.clone(), 0.0));
                continue;
            }
            match raw.parse::<f64>() {
                Ok(v) => {
                    if !(0.0..=100.0).contains(&v) {
                        errors.push(ValidationError {
                            row: row_no,
                            column: col.clone(),
                            message: "Score must be between 0 and 100".to_string(),
                        });
                    }
                    // Out-of-range is advisory; the value is kept.
                    scores.push((col.clone(), v));
                }
                Err(_) => {
                    errors.push(ValidationError {
                        row: row_no,
                        column: col.clone(),
                        message: "Score must be a number".to_string(),
                    });
                }
            }
        }

        let mut attendance = None;
        if let Some(att_col) = &cols.attendance_column {
            let raw = cell(row, att_col);
            if !raw.is_empty() {
                match raw.parse::<f64>() {
                    Ok(v) => attendance = Some(v.round() as i64),
                    Err(_) => errors.push(ValidationError {
                        row: row_no,
                        column: att_col.clone(),
                        message: "Attendance must be a number".to_string(),
                    }),
                }
            }
        }

        let term = cols
            .term_column
            .as_ref()
            .map(|c| cell(row, c))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| ctx.default_term.to_string());
        let academic_year = cols
            .year_column
            .as_ref()
            .map(|c| cell(row, c))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| ctx.default_year.to_string());

        records.push(StudentRecord {
            student_id,
            name,
            scores,
            term,
            academic_year,
            attendance,
        });
    }

    let is_valid = errors.is_empty() && !records.is_empty();
    ParseOutcome {
        records,
        errors,
        is_valid,
    }
}

/// Bounded human-readable error list: the first few, then "+N more".
pub fn summarize_errors(errors: &[ValidationError], limit: usize) -> Vec<String> {
    let mut out: Vec<String> = errors
        .iter()
        .take(limit)
        .map(|e| format!("Row {}, {}: {}", e.row, e.column, e.message))
        .collect();
    if errors.len() > limit {
        out.push(format!("+{} more", errors.len() - limit));
    }
    out
}

fn cell(row: &std::collections::HashMap<String, String>, col: &str) -> String {
    row.get(col).map(|v| v.trim().to_string()).unwrap_or_default()
}
