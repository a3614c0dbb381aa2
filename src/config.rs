use chrono::Datelike;

/// Closed set of valid term labels. Uploads and report generation must name
/// one of these; a row's own TERM cell is taken verbatim.
pub const TERMS: [&str; 3] = ["First Term", "Second Term", "Third Term"];

/// Accepted upload extensions (lowercased, without the dot).
pub const UPLOAD_EXTENSIONS: [&str; 2] = ["xlsx", "csv"];

/// Hard cap on upload size.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Fixed attendance denominator used by the placeholder attendance source.
pub const ATTENDANCE_TOTAL: i64 = 120;

pub fn is_valid_term(term: &str) -> bool {
    TERMS.iter().any(|t| *t == term)
}

/// `YYYY/YYYY`, both halves four digits.
pub fn is_valid_academic_year(year: &str) -> bool {
    let Some((a, b)) = year.split_once('/') else {
        return false;
    };
    a.len() == 4
        && b.len() == 4
        && a.chars().all(|c| c.is_ascii_digit())
        && b.chars().all(|c| c.is_ascii_digit())
}

pub fn default_academic_year() -> String {
    let y = chrono::Local::now().year();
    format!("{}/{}", y, y + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn academic_year_format() {
        assert!(is_valid_academic_year("2024/2025"));
        assert!(!is_valid_academic_year("2024"));
        assert!(!is_valid_academic_year("2024/25"));
        assert!(!is_valid_academic_year("24/2025"));
        assert!(!is_valid_academic_year("2024-2025"));
    }

    #[test]
    fn default_year_spans_two_years() {
        let y = default_academic_year();
        assert!(is_valid_academic_year(&y));
        let (a, b) = y.split_once('/').unwrap();
        assert_eq!(a.parse::<i32>().unwrap() + 1, b.parse::<i32>().unwrap());
    }

    #[test]
    fn term_membership() {
        assert!(is_valid_term("First Term"));
        assert!(!is_valid_term("first term"));
        assert!(!is_valid_term("Fourth Term"));
    }
}
