//! Report building and class-relative ranking.
//!
//! Every computation here works from whole-class batched fetches; nothing in
//! this module issues per-student queries inside a loop.

use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::config::ATTENDANCE_TOTAL;
use crate::grading::grade_for;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassContext<'a> {
    pub conn: &'a Connection,
    pub class_id: &'a str,
    pub term: &'a str,
    pub academic_year: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub student_no: String,
    pub name: String,
    pub attendance: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
struct ScoreEntry {
    student_id: String,
    subject_id: String,
    assessment_type: String,
    score: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub present: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    pub subject_id: String,
    pub subject_name: String,
    pub continuous_assessment: i64,
    pub exam_score: i64,
    pub total_score: i64,
    pub grade: String,
    pub remark: String,
    pub position: String,
    pub raw_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub student_id: String,
    pub student_no: String,
    pub student_name: String,
    pub class_id: String,
    pub class_name: String,
    pub school_name: String,
    pub term: String,
    pub academic_year: String,
    pub attendance: Attendance,
    pub position: String,
    pub subjects: Vec<SubjectReport>,
}

/// Continuous-assessment and exam halves of one subject's score set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubjectTotals {
    pub ca_half: f64,
    pub exam_half: f64,
}

impl SubjectTotals {
    pub fn total(&self) -> f64 {
        self.ca_half + self.exam_half
    }
}

pub fn is_exam_label(label: &str) -> bool {
    label.to_uppercase().contains("EXAM")
}

/// 50/50 split: CA is the sum of all non-exam entries, the exam component is
/// the first exam-like entry in iteration order. When several exam-like
/// entries exist the later ones are ignored entirely (first match wins; see
/// the design notes before changing this).
pub fn subject_totals<'a, I>(entries: I) -> SubjectTotals
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut ca_sum = 0.0;
    let mut exam: Option<f64> = None;
    for (label, value) in entries {
        if is_exam_label(label) {
            if exam.is_none() {
                exam = Some(value);
            }
        } else {
            ca_sum += value;
        }
    }
    SubjectTotals {
        ca_half: ca_sum * 0.5,
        exam_half: exam.unwrap_or(0.0) * 0.5,
    }
}

/// Average of per-subject totals over subjects that have any score rows.
/// A student with no score rows anywhere averages 0.
pub fn overall_average(per_subject_totals: &[f64]) -> f64 {
    if per_subject_totals.is_empty() {
        0.0
    } else {
        per_subject_totals.iter().sum::<f64>() / per_subject_totals.len() as f64
    }
}

fn round_display(x: f64) -> i64 {
    x.round() as i64
}

/// Linear progress across students: 20% after the first slice of work,
/// 90% once the last student is done.
pub fn progress_at(index: usize, count: usize) -> u8 {
    if count == 0 {
        return 90;
    }
    (20 + ((index + 1) * 70) / count) as u8
}

/// Numeric positions sort ascending; "N/A"/"Error" sort last.
pub fn position_sort_key(position: &str) -> i64 {
    position.parse().unwrap_or(i64::MAX)
}

pub fn class_meta(
    conn: &Connection,
    class_id: &str,
) -> Result<(String, String, String), CalcError> {
    conn.query_row(
        "SELECT c.name, c.school_id, s.name
         FROM classes c JOIN schools s ON s.id = c.school_id
         WHERE c.id = ?",
        [class_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .optional()
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| CalcError::new("not_found", "class not found"))
}

/// All students of a class in insertion order. That order is also the
/// ranking tie-break: equal totals keep their fetch order under the stable
/// sort.
pub fn class_students(conn: &Connection, class_id: &str) -> Result<Vec<StudentRow>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_no, name, attendance
             FROM students WHERE class_id = ? ORDER BY rowid",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([class_id], |r| {
        Ok(StudentRow {
            id: r.get(0)?,
            student_no: r.get(1)?,
            name: r.get(2)?,
            attendance: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

pub fn class_subjects(conn: &Connection, class_id: &str) -> Result<Vec<SubjectRow>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM subjects WHERE class_id = ? ORDER BY rowid")
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([class_id], |r| {
        Ok(SubjectRow {
            id: r.get(0)?,
            name: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// One batched query for everything a single report needs.
fn scores_for_student(
    ctx: &ClassContext<'_>,
    student_row_id: &str,
    subjects: &[SubjectRow],
) -> Result<Vec<ScoreEntry>, CalcError> {
    if subjects.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT student_id, subject_id, assessment_type, score
         FROM scores
         WHERE student_id = ? AND term = ? AND academic_year = ?
           AND subject_id IN ({})
         ORDER BY rowid",
        placeholders(subjects.len())
    );
    let mut params: Vec<Value> = vec![
        Value::from(student_row_id.to_string()),
        Value::from(ctx.term.to_string()),
        Value::from(ctx.academic_year.to_string()),
    ];
    params.extend(subjects.iter().map(|s| Value::from(s.id.clone())));

    let mut stmt = ctx
        .conn
        .prepare(&sql)
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map(params_from_iter(params), |r| {
        Ok(ScoreEntry {
            student_id: r.get(0)?,
            subject_id: r.get(1)?,
            assessment_type: r.get(2)?,
            score: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

/// One batched query for every relevant score row of the whole class.
fn scores_for_class(
    ctx: &ClassContext<'_>,
    subjects: &[SubjectRow],
    students: &[StudentRow],
) -> Result<Vec<ScoreEntry>, CalcError> {
    if subjects.is_empty() || students.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT student_id, subject_id, assessment_type, score
         FROM scores
         WHERE term = ? AND academic_year = ?
           AND subject_id IN ({})
           AND student_id IN ({})
         ORDER BY rowid",
        placeholders(subjects.len()),
        placeholders(students.len())
    );
    let mut params: Vec<Value> = vec![
        Value::from(ctx.term.to_string()),
        Value::from(ctx.academic_year.to_string()),
    ];
    params.extend(subjects.iter().map(|s| Value::from(s.id.clone())));
    params.extend(students.iter().map(|s| Value::from(s.id.clone())));

    let mut stmt = ctx
        .conn
        .prepare(&sql)
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map(params_from_iter(params), |r| {
        Ok(ScoreEntry {
            student_id: r.get(0)?,
            subject_id: r.get(1)?,
            assessment_type: r.get(2)?,
            score: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

/// Build one student's report with ranking fields left at "N/A"; a second
/// pass (`apply_rankings`) fills those, since they need the whole class.
pub fn build_report(
    ctx: &ClassContext<'_>,
    student: &StudentRow,
    subjects: &[SubjectRow],
    class_name: &str,
    school_name: &str,
) -> Result<Report, CalcError> {
    let entries = scores_for_student(ctx, &student.id, subjects)?;
    let mut by_subject: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
    for e in &entries {
        by_subject
            .entry(e.subject_id.as_str())
            .or_default()
            .push((e.assessment_type.as_str(), e.score));
    }

    let mut subject_reports = Vec::with_capacity(subjects.len());
    for subject in subjects {
        let scores = by_subject
            .get(subject.id.as_str())
            .cloned()
            .unwrap_or_default();
        let raw_scores: BTreeMap<String, f64> = scores
            .iter()
            .map(|(label, v)| (label.to_string(), *v))
            .collect();
        let totals = subject_totals(scores);
        // Display fields are rounded; the grade comes from the unrounded sum.
        let band = grade_for(totals.total());
        subject_reports.push(SubjectReport {
            subject_id: subject.id.clone(),
            subject_name: subject.name.clone(),
            continuous_assessment: round_display(totals.ca_half),
            exam_score: round_display(totals.exam_half),
            total_score: round_display(totals.ca_half) + round_display(totals.exam_half),
            grade: band.grade.to_string(),
            remark: band.remark.to_string(),
            position: "N/A".to_string(),
            raw_scores,
        });
    }

    Ok(Report {
        student_id: student.id.clone(),
        student_no: student.student_no.clone(),
        student_name: student.name.clone(),
        class_id: ctx.class_id.to_string(),
        class_name: class_name.to_string(),
        school_name: school_name.to_string(),
        term: ctx.term.to_string(),
        academic_year: ctx.academic_year.to_string(),
        attendance: attendance_for(student),
        position: "N/A".to_string(),
        subjects: subject_reports,
    })
}

// Attendance source: the uploaded value when one exists, otherwise a random
// placeholder. Real attendance tracking hooks in here.
fn attendance_for(student: &StudentRow) -> Attendance {
    use rand::Rng;
    let present = match student.attendance {
        Some(v) => v.clamp(0, ATTENDANCE_TOTAL),
        None => rand::rng().random_range(0..=ATTENDANCE_TOTAL),
    };
    Attendance {
        present,
        total: ATTENDANCE_TOTAL,
    }
}

/// Fill per-subject and overall positions for one report. Each pass fails
/// coarsely: any error inside the per-subject pass marks every subject
/// "Error" at once, matching the batch granularity callers expect.
pub fn apply_rankings(ctx: &ClassContext<'_>, report: &mut Report, subjects: &[SubjectRow]) {
    if let Err(e) = fill_subject_positions(ctx, report, subjects) {
        tracing::warn!(
            code = %e.code,
            message = %e.message,
            student = %report.student_no,
            "subject ranking failed"
        );
        for s in &mut report.subjects {
            s.position = "Error".to_string();
        }
    }
    match overall_position(ctx, &report.student_id) {
        Ok(pos) => report.position = pos,
        Err(e) => {
            tracing::warn!(
                code = %e.code,
                message = %e.message,
                student = %report.student_no,
                "overall ranking failed"
            );
            report.position = "Error".to_string();
        }
    }
}

fn fill_subject_positions(
    ctx: &ClassContext<'_>,
    report: &mut Report,
    subjects: &[SubjectRow],
) -> Result<(), CalcError> {
    let students = class_students(ctx.conn, ctx.class_id)?;
    let all_scores = scores_for_class(ctx, subjects, &students)?;

    // subject -> student -> entries, preserving row order within a student.
    let mut grouped: HashMap<&str, HashMap<&str, Vec<(&str, f64)>>> = HashMap::new();
    for e in &all_scores {
        grouped
            .entry(e.subject_id.as_str())
            .or_default()
            .entry(e.student_id.as_str())
            .or_default()
            .push((e.assessment_type.as_str(), e.score));
    }

    for subject in &mut report.subjects {
        let per_student = grouped.get(subject.subject_id.as_str());
        let mut standings: Vec<(&str, f64)> = Vec::new();
        for student in &students {
            if let Some(entries) = per_student.and_then(|m| m.get(student.id.as_str())) {
                standings.push((
                    student.id.as_str(),
                    subject_totals(entries.iter().copied()).total(),
                ));
            }
        }
        // Stable sort: ties keep class fetch order.
        standings.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        subject.position = match standings
            .iter()
            .position(|(id, _)| *id == report.student_id)
        {
            Some(i) => (i + 1).to_string(),
            None => "N/A".to_string(),
        };
    }
    Ok(())
}

fn overall_position(ctx: &ClassContext<'_>, student_row_id: &str) -> Result<String, CalcError> {
    let students = class_students(ctx.conn, ctx.class_id)?;
    let subjects = class_subjects(ctx.conn, ctx.class_id)?;
    let all_scores = scores_for_class(ctx, &subjects, &students)?;

    let mut grouped: HashMap<&str, HashMap<&str, Vec<(&str, f64)>>> = HashMap::new();
    for e in &all_scores {
        grouped
            .entry(e.student_id.as_str())
            .or_default()
            .entry(e.subject_id.as_str())
            .or_default()
            .push((e.assessment_type.as_str(), e.score));
    }

    let mut standings: Vec<(&str, f64)> = Vec::with_capacity(students.len());
    for student in &students {
        let totals: Vec<f64> = grouped
            .get(student.id.as_str())
            .map(|per_subject| {
                subjects
                    .iter()
                    .filter_map(|s| per_subject.get(s.id.as_str()))
                    .map(|entries| subject_totals(entries.iter().copied()).total())
                    .collect()
            })
            .unwrap_or_default();
        standings.push((student.id.as_str(), overall_average(&totals)));
    }
    standings.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    Ok(match standings.iter().position(|(id, _)| *id == student_row_id) {
        Some(i) => (i + 1).to_string(),
        None => "N/A".to_string(),
    })
}
