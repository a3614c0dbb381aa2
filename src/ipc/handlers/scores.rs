use crate::calc;
use crate::columns::{ColumnMatcher, SubstringMatcher};
use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::persist;
use crate::sheet;
use crate::validate::{self, ParseOutcome, RowContext};
use serde_json::json;
use std::path::{Path, PathBuf};

const ERROR_SUMMARY_LIMIT: usize = 5;

fn check_term_and_year(req: &Request, term: &str, year: &str) -> Result<(), serde_json::Value> {
    if !config::is_valid_term(term) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("term must be one of: {}", config::TERMS.join(", ")),
            None,
        ));
    }
    if !config::is_valid_academic_year(year) {
        return Err(err(
            &req.id,
            "bad_params",
            "academicYear must be formatted YYYY/YYYY",
            None,
        ));
    }
    Ok(())
}

/// Parse + validate one file. Input-format problems (extension, size, no
/// header) are reported before any row is inspected.
fn parse_file(path: &Path, term: &str, year: &str) -> Result<ParseOutcome, String> {
    let table = sheet::read_table(path).map_err(|e| e.to_string())?;
    let cols = SubstringMatcher.infer(&table.headers);
    Ok(validate::validate_rows(
        &table,
        &cols,
        &RowContext {
            default_term: term,
            default_year: year,
        },
    ))
}

fn outcome_json(outcome: &ParseOutcome) -> serde_json::Value {
    json!({
        "recordCount": outcome.records.len(),
        "errors": outcome.errors,
        "errorSummary": validate::summarize_errors(&outcome.errors, ERROR_SUMMARY_LIMIT),
        "isValid": outcome.is_valid,
    })
}

fn handle_validate_file(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let file_path = match required_str(req, "filePath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    let term = req
        .params
        .get("term")
        .and_then(|v| v.as_str())
        .unwrap_or(config::TERMS[0])
        .to_string();
    let year = req
        .params
        .get("academicYear")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or_else(config::default_academic_year);

    match parse_file(&file_path, &term, &year) {
        Ok(outcome) => ok(&req.id, outcome_json(&outcome)),
        Err(message) => err(
            &req.id,
            "bad_file",
            message,
            Some(json!({ "file": file_path.to_string_lossy() })),
        ),
    }
}

fn handle_upload_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let file_path = match required_str(req, "filePath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_name = match required_str(req, "subjectName") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if subject_name.is_empty() {
        return err(&req.id, "bad_params", "subjectName must not be empty", None);
    }
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_term_and_year(req, &term, &year) {
        return resp;
    }

    let (_, school_id, _) = match calc::class_meta(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };

    let outcome = match parse_file(&file_path, &term, &year) {
        Ok(v) => v,
        Err(message) => {
            return err(
                &req.id,
                "bad_file",
                message,
                Some(json!({ "file": file_path.to_string_lossy() })),
            )
        }
    };
    if !outcome.is_valid {
        if outcome.errors.is_empty() {
            return err(
                &req.id,
                "no_valid_records",
                "no valid student records found in file",
                None,
            );
        }
        return err(
            &req.id,
            "validation_failed",
            "file has validation errors",
            Some(outcome_json(&outcome)),
        );
    }

    let subject_id = match persist::resolve_subject(conn, &school_id, &class_id, &subject_name) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let counts =
        match persist::apply_records(conn, &school_id, &class_id, &subject_id, &outcome.records) {
            Ok(v) => v,
            Err(e) => return err(&req.id, &e.code, e.message, None),
        };

    tracing::info!(
        subject = %subject_name,
        students = counts.students,
        score_rows = counts.score_rows,
        "subject upload applied"
    );
    ok(
        &req.id,
        json!({
            "subjectId": subject_id,
            "subjectName": subject_name,
            "applied": counts,
        }),
    )
}

fn handle_upload_bulk(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(resp) = check_term_and_year(req, &term, &year) {
        return resp;
    }
    let file_paths: Vec<PathBuf> = match req.params.get("filePaths").and_then(|v| v.as_array()) {
        Some(arr) => arr
            .iter()
            .filter_map(|v| v.as_str())
            .map(PathBuf::from)
            .collect(),
        None => return err(&req.id, "bad_params", "missing filePaths", None),
    };
    if file_paths.is_empty() {
        return err(&req.id, "bad_params", "filePaths must not be empty", None);
    }

    let (_, school_id, _) = match calc::class_meta(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };

    // Validate every file before writing anything. A single invalid file
    // rejects the whole batch here; store failures later do not undo files
    // already applied.
    let mut parsed: Vec<(PathBuf, String, ParseOutcome)> = Vec::with_capacity(file_paths.len());
    let mut invalid: Vec<serde_json::Value> = Vec::new();
    for path in &file_paths {
        // Subject name comes from the file name, extension stripped.
        let subject_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if subject_name.is_empty() {
            invalid.push(json!({
                "file": path.to_string_lossy(),
                "message": "cannot derive a subject name from the file name",
            }));
            continue;
        }
        match parse_file(path, &term, &year) {
            Ok(outcome) if outcome.is_valid => parsed.push((path.clone(), subject_name, outcome)),
            Ok(outcome) => {
                let mut detail = outcome_json(&outcome);
                detail["file"] = json!(path.to_string_lossy());
                invalid.push(detail);
            }
            Err(message) => invalid.push(json!({
                "file": path.to_string_lossy(),
                "message": message,
            })),
        }
    }
    if !invalid.is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "one or more files failed validation",
            Some(json!({ "files": invalid })),
        );
    }

    let mut results: Vec<serde_json::Value> = Vec::with_capacity(parsed.len());
    for (path, subject_name, outcome) in &parsed {
        let subject_id = match persist::resolve_subject(conn, &school_id, &class_id, subject_name)
        {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    &e.code,
                    "Failed to upload data",
                    Some(json!({ "file": path.to_string_lossy(), "cause": e.message })),
                )
            }
        };
        let counts =
            match persist::apply_records(conn, &school_id, &class_id, &subject_id, &outcome.records)
            {
                Ok(v) => v,
                Err(e) => {
                    // Earlier files stay applied; this one's transaction rolled
                    // back and the rest of the batch is abandoned.
                    return err(
                        &req.id,
                        &e.code,
                        "Failed to upload data",
                        Some(json!({ "file": path.to_string_lossy(), "cause": e.message })),
                    );
                }
            };
        tracing::info!(
            subject = %subject_name,
            students = counts.students,
            score_rows = counts.score_rows,
            "bulk upload file applied"
        );
        results.push(json!({
            "file": path.to_string_lossy(),
            "subjectName": subject_name,
            "subjectId": subject_id,
            "applied": counts,
        }));
    }

    ok(&req.id, json!({ "files": results }))
}

fn handle_scores_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut sql = String::from(
        "SELECT subject_id, assessment_type, score, max_score, term, academic_year
         FROM scores WHERE student_id = ?",
    );
    let mut params: Vec<String> = vec![student_id];
    for key in ["subjectId", "term", "academicYear"] {
        if let Some(v) = req.params.get(key).and_then(|v| v.as_str()) {
            let column = match key {
                "subjectId" => "subject_id",
                "term" => "term",
                _ => "academic_year",
            };
            sql.push_str(&format!(" AND {} = ?", column));
            params.push(v.to_string());
        }
    }
    sql.push_str(" ORDER BY rowid");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(&params), |row| {
            let subject_id: String = row.get(0)?;
            let assessment_type: String = row.get(1)?;
            let score: f64 = row.get(2)?;
            let max_score: f64 = row.get(3)?;
            let term: String = row.get(4)?;
            let academic_year: String = row.get(5)?;
            Ok(json!({
                "subjectId": subject_id,
                "assessmentType": assessment_type,
                "score": score,
                "maxScore": max_score,
                "term": term,
                "academicYear": academic_year
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(scores) => ok(&req.id, json!({ "scores": scores })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.validateFile" => Some(handle_validate_file(state, req)),
        "scores.uploadSubject" => Some(handle_upload_subject(state, req)),
        "scores.uploadBulk" => Some(handle_upload_bulk(state, req)),
        "scores.list" => Some(handle_scores_list(state, req)),
        _ => None,
    }
}
