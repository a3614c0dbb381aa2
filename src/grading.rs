/// Nine-band grading scale over combined scores in [0, 100].
///
/// Bands are ordered by descending threshold; `grade_for` returns the first
/// band whose minimum the score reaches, so boundary values (80, 75, 70, ...)
/// land in the higher band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeBand {
    pub min: f64,
    pub grade: &'static str,
    pub remark: &'static str,
}

pub const GRADE_BANDS: [GradeBand; 9] = [
    GradeBand { min: 80.0, grade: "1", remark: "Excellent" },
    GradeBand { min: 75.0, grade: "2", remark: "Very Good" },
    GradeBand { min: 70.0, grade: "3", remark: "Good" },
    GradeBand { min: 65.0, grade: "4", remark: "Credit" },
    GradeBand { min: 60.0, grade: "5", remark: "Average" },
    GradeBand { min: 50.0, grade: "6", remark: "Below Average" },
    GradeBand { min: 45.0, grade: "7", remark: "Pass" },
    GradeBand { min: 40.0, grade: "8", remark: "Developing" },
    GradeBand { min: 0.0, grade: "9", remark: "Emerging" },
];

pub fn grade_for(total: f64) -> &'static GradeBand {
    GRADE_BANDS
        .iter()
        .find(|b| total >= b.min)
        .unwrap_or(&GRADE_BANDS[GRADE_BANDS.len() - 1])
}
