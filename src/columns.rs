//! Header-row column inference for uploaded score sheets.
//!
//! Spreadsheets arrive with inconsistent header phrasing from different
//! schools, so the default matcher does fuzzy substring matching on the
//! uppercased header text. False positives are an accepted tradeoff of that
//! approach; `ExactMatcher` is the strict alternative for callers that want
//! to opt out of it.

pub const DEFAULT_ID_COLUMN: &str = "STUDENT REGISTER ID";
pub const DEFAULT_NAME_COLUMN: &str = "STUDENT NAME";

const ATTENDANCE_COLUMN: &str = "ATTENDANCE";
const TERM_COLUMN: &str = "TERM";
const YEAR_COLUMN: &str = "ACADEMIC YEAR";

#[derive(Debug, Clone, PartialEq)]
pub struct InferredColumns {
    pub id_column: String,
    pub name_column: String,
    pub attendance_column: Option<String>,
    pub term_column: Option<String>,
    pub year_column: Option<String>,
    /// Every remaining header, in sheet order.
    pub assessment_columns: Vec<String>,
}

pub trait ColumnMatcher {
    fn infer(&self, headers: &[String]) -> InferredColumns;
}

/// Default fuzzy matcher: uppercased substring containment.
pub struct SubstringMatcher;

impl ColumnMatcher for SubstringMatcher {
    fn infer(&self, headers: &[String]) -> InferredColumns {
        let id_column = headers
            .iter()
            .find(|h| {
                let up = h.to_uppercase();
                (up.contains("STUDENT") && up.contains("ID"))
                    || (up.contains("REGISTER") && up.contains("ID"))
            })
            .cloned()
            .unwrap_or_else(|| DEFAULT_ID_COLUMN.to_string());

        let name_column = headers
            .iter()
            .find(|h| {
                let up = h.to_uppercase();
                up.contains("STUDENT") && up.contains("NAME")
            })
            .cloned()
            .unwrap_or_else(|| DEFAULT_NAME_COLUMN.to_string());

        classify_rest(headers, id_column, name_column)
    }
}

/// Strict matcher: headers must equal the canonical literals
/// (case-insensitively) to be recognized.
pub struct ExactMatcher;

impl ColumnMatcher for ExactMatcher {
    fn infer(&self, headers: &[String]) -> InferredColumns {
        let id_column = headers
            .iter()
            .find(|h| h.eq_ignore_ascii_case(DEFAULT_ID_COLUMN))
            .cloned()
            .unwrap_or_else(|| DEFAULT_ID_COLUMN.to_string());
        let name_column = headers
            .iter()
            .find(|h| h.eq_ignore_ascii_case(DEFAULT_NAME_COLUMN))
            .cloned()
            .unwrap_or_else(|| DEFAULT_NAME_COLUMN.to_string());
        classify_rest(headers, id_column, name_column)
    }
}

fn classify_rest(headers: &[String], id_column: String, name_column: String) -> InferredColumns {
    let mut attendance_column = None;
    let mut term_column = None;
    let mut year_column = None;
    let mut assessment_columns = Vec::new();

    for h in headers {
        if *h == id_column || *h == name_column {
            continue;
        }
        if h.eq_ignore_ascii_case(ATTENDANCE_COLUMN) {
            attendance_column.get_or_insert_with(|| h.clone());
        } else if h.eq_ignore_ascii_case(TERM_COLUMN) {
            term_column.get_or_insert_with(|| h.clone());
        } else if h.eq_ignore_ascii_case(YEAR_COLUMN) {
            year_column.get_or_insert_with(|| h.clone());
        } else {
            assessment_columns.push(h.clone());
        }
    }

    InferredColumns {
        id_column,
        name_column,
        attendance_column,
        term_column,
        year_column,
        assessment_columns,
    }
}
