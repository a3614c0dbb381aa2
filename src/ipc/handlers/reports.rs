use crate::calc::{self, ClassContext, Report};
use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !config::is_valid_term(&term) {
        return err(
            &req.id,
            "bad_params",
            format!("term must be one of: {}", config::TERMS.join(", ")),
            None,
        );
    }
    if !config::is_valid_academic_year(&year) {
        return err(
            &req.id,
            "bad_params",
            "academicYear must be formatted YYYY/YYYY",
            None,
        );
    }

    let (class_name, _school_id, school_name) = match calc::class_meta(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let students = match calc::class_students(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    if students.is_empty() {
        return err(&req.id, "no_students", "No students found in this class", None);
    }
    let subjects = match calc::class_subjects(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    if subjects.is_empty() {
        return err(&req.id, "no_subjects", "No subjects found for this class", None);
    }

    let ctx = ClassContext {
        conn,
        class_id: &class_id,
        term: &term,
        academic_year: &year,
    };

    let mut progress: Vec<u8> = vec![10];
    let mut reports: Vec<Report> = Vec::with_capacity(students.len());
    let mut skipped: Vec<String> = Vec::new();
    for (i, student) in students.iter().enumerate() {
        match calc::build_report(&ctx, student, &subjects, &class_name, &school_name) {
            Ok(mut report) => {
                calc::apply_rankings(&ctx, &mut report, &subjects);
                reports.push(report);
            }
            Err(e) => {
                // One student's failure must not abort the batch.
                tracing::warn!(
                    code = %e.code,
                    message = %e.message,
                    student = %student.student_no,
                    "report generation failed; student skipped"
                );
                skipped.push(student.student_no.clone());
            }
        }
        let pct = calc::progress_at(i, students.len());
        tracing::debug!(pct, "batch progress");
        progress.push(pct);
    }

    reports.sort_by_key(|r| calc::position_sort_key(&r.position));

    let display_name = format!("{} - {} {}", class_name, term, year);
    let generated_at = chrono::Utc::now().to_rfc3339();
    let payload = match serde_json::to_string(&reports) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "serialize_failed", e.to_string(), None),
    };
    let batch_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "DELETE FROM report_batches WHERE class_id = ? AND term = ? AND academic_year = ?",
        (&class_id, &term, &year),
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute(
        "INSERT INTO report_batches(id, class_id, term, academic_year, display_name, generated_at, payload)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &batch_id,
            &class_id,
            &term,
            &year,
            &display_name,
            &generated_at,
            &payload,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    progress.push(100);

    ok(
        &req.id,
        json!({
            "batchId": batch_id,
            "displayName": display_name,
            "generatedAt": generated_at,
            "reports": reports,
            "skipped": skipped,
            "progress": progress,
        }),
    )
}

fn handle_cache_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, class_id, term, academic_year, display_name, generated_at
         FROM report_batches
         ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let class_id: String = row.get(1)?;
            let term: String = row.get(2)?;
            let academic_year: String = row.get(3)?;
            let display_name: String = row.get(4)?;
            let generated_at: String = row.get(5)?;
            Ok(json!({
                "batchId": id,
                "classId": class_id,
                "term": term,
                "academicYear": academic_year,
                "displayName": display_name,
                "generatedAt": generated_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(batches) => ok(&req.id, json!({ "batches": batches })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_cache_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let row = if let Some(batch_id) = req.params.get("batchId").and_then(|v| v.as_str()) {
        conn.query_row(
            "SELECT id, class_id, term, academic_year, display_name, generated_at, payload
             FROM report_batches WHERE id = ?",
            [batch_id],
            row_to_tuple,
        )
        .optional()
    } else {
        let class_id = match required_str(req, "classId") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let term = match required_str(req, "term") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let year = match required_str(req, "academicYear") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        conn.query_row(
            "SELECT id, class_id, term, academic_year, display_name, generated_at, payload
             FROM report_batches
             WHERE class_id = ? AND term = ? AND academic_year = ?",
            (&class_id, &term, &year),
            row_to_tuple,
        )
        .optional()
    };

    let row = match row {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((id, class_id, term, academic_year, display_name, generated_at, payload)) = row else {
        return err(&req.id, "not_found", "report batch not found", None);
    };
    let reports: serde_json::Value = match serde_json::from_str(&payload) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "cache_corrupt", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "batchId": id,
            "classId": class_id,
            "term": term,
            "academicYear": academic_year,
            "displayName": display_name,
            "generatedAt": generated_at,
            "reports": reports,
        }),
    )
}

#[allow(clippy::type_complexity)]
fn row_to_tuple(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(String, String, String, String, String, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn handle_cache_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let batch_id = match required_str(req, "batchId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute("DELETE FROM report_batches WHERE id = ?", [&batch_id]) {
        Ok(0) => err(&req.id, "not_found", "report batch not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.generate" => Some(handle_generate(state, req)),
        "reports.cacheList" => Some(handle_cache_list(state, req)),
        "reports.cacheGet" => Some(handle_cache_get(state, req)),
        "reports.cacheDelete" => Some(handle_cache_delete(state, req)),
        _ => None,
    }
}
