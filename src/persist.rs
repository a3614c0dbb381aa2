//! Persistence adapter for validated score records.
//!
//! One call site for both upload paths: resolves subjects and students
//! (create-or-find, race-safe) and replaces prior score rows for the same
//! (student, subject, term, academic year) key so re-uploads never
//! accumulate duplicates.

use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::validate::StudentRecord;

#[derive(Debug, Clone, Serialize)]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCounts {
    pub students: usize,
    pub created_students: usize,
    pub score_rows: usize,
}

/// Find a subject by (name, class, school), creating it if absent.
pub fn resolve_subject(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
    name: &str,
) -> Result<String, StoreError> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM subjects WHERE name = ? AND class_id = ? AND school_id = ?",
            (name, class_id, school_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let subject_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO subjects(id, school_id, class_id, name) VALUES(?, ?, ?, ?)",
        (&subject_id, school_id, class_id, name),
    ) {
        Ok(_) => Ok(subject_id),
        // Lost a creation race; the row exists now.
        Err(e) if is_constraint_violation(&e) => conn
            .query_row(
                "SELECT id FROM subjects WHERE name = ? AND class_id = ? AND school_id = ?",
                (name, class_id, school_id),
                |r| r.get(0),
            )
            .map_err(|e| StoreError::new("db_query_failed", e.to_string())),
        Err(e) => Err(StoreError::new("db_insert_failed", e.to_string())),
    }
}

/// Find a student by (student_no, school). A student found under a different
/// class is migrated in place (class and name updated), not duplicated. An
/// insert that loses a uniqueness race is retried as a lookup.
pub fn upsert_student(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
    rec: &StudentRecord,
) -> Result<(String, bool), StoreError> {
    let found: Option<(String, String)> = conn
        .query_row(
            "SELECT id, class_id FROM students WHERE student_no = ? AND school_id = ?",
            (&rec.student_id, school_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;

    if let Some((id, current_class)) = found {
        if current_class != class_id {
            conn.execute(
                "UPDATE students SET class_id = ?, name = ? WHERE id = ?",
                (class_id, &rec.name, &id),
            )
            .map_err(|e| StoreError::new("db_update_failed", e.to_string()))?;
        }
        if let Some(att) = rec.attendance {
            conn.execute(
                "UPDATE students SET attendance = ? WHERE id = ?",
                (att, &id),
            )
            .map_err(|e| StoreError::new("db_update_failed", e.to_string()))?;
        }
        return Ok((id, false));
    }

    let student_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO students(id, school_id, class_id, student_no, name, attendance)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            school_id,
            class_id,
            &rec.student_id,
            &rec.name,
            rec.attendance,
        ),
    ) {
        Ok(_) => Ok((student_id, true)),
        Err(e) if is_constraint_violation(&e) => {
            // Another client created this student between our lookup and
            // insert. That is success, not failure.
            conn.query_row(
                "SELECT id FROM students WHERE student_no = ? AND school_id = ?",
                (&rec.student_id, school_id),
                |r| r.get(0),
            )
            .map(|id| (id, false))
            .map_err(|e| StoreError::new("db_query_failed", e.to_string()))
        }
        Err(e) => Err(StoreError::new("db_insert_failed", e.to_string())),
    }
}

/// Delete every prior score row for (student, subject, term, year), then
/// insert one row per assessment entry. This is the only update mechanism;
/// there is no merge path.
pub fn replace_scores(
    conn: &Connection,
    student_row_id: &str,
    subject_id: &str,
    rec: &StudentRecord,
) -> Result<usize, StoreError> {
    conn.execute(
        "DELETE FROM scores
         WHERE student_id = ? AND subject_id = ? AND term = ? AND academic_year = ?",
        (student_row_id, subject_id, &rec.term, &rec.academic_year),
    )
    .map_err(|e| StoreError::new("db_delete_failed", e.to_string()))?;

    let mut stmt = conn
        .prepare(
            "INSERT INTO scores(id, student_id, subject_id, assessment_type, score, max_score, term, academic_year)
             VALUES(?, ?, ?, ?, ?, 100, ?, ?)",
        )
        .map_err(|e| StoreError::new("db_insert_failed", e.to_string()))?;

    let mut inserted = 0usize;
    for (assessment_type, score) in &rec.scores {
        stmt.execute((
            Uuid::new_v4().to_string(),
            student_row_id,
            subject_id,
            assessment_type,
            score,
            &rec.term,
            &rec.academic_year,
        ))
        .map_err(|e| StoreError::new("db_insert_failed", e.to_string()))?;
        inserted += 1;
    }
    Ok(inserted)
}

/// Apply one file's records for a resolved subject inside a single
/// transaction, so a mid-file store failure leaves nothing half-written.
pub fn apply_records(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
    subject_id: &str,
    records: &[StudentRecord],
) -> Result<AppliedCounts, StoreError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| StoreError::new("db_tx_failed", e.to_string()))?;

    let mut counts = AppliedCounts::default();
    for rec in records {
        let (student_row_id, created) = upsert_student(&tx, school_id, class_id, rec)?;
        if created {
            counts.created_students += 1;
        }
        counts.students += 1;
        counts.score_rows += replace_scores(&tx, &student_row_id, subject_id, rec)?;
    }

    tx.commit()
        .map_err(|e| StoreError::new("db_commit_failed", e.to_string()))?;
    Ok(counts)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}
