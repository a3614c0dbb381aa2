use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_reportcardd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reportcardd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Seeded {
    workspace: PathBuf,
    class_id: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seeded {
    let workspace = temp_dir("reportcard-upload");
    request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(
        stdin,
        reader,
        "s2",
        "schools.create",
        json!({ "name": "Hillcrest Academy" }),
    );
    let school_id = school["schoolId"].as_str().expect("schoolId").to_string();
    let class = request_ok(
        stdin,
        reader,
        "s3",
        "classes.create",
        json!({ "schoolId": school_id, "name": "JSS 1A" }),
    );
    Seeded {
        workspace,
        class_id: class["classId"].as_str().expect("classId").to_string(),
    }
}

#[test]
fn upload_then_list_students_subjects_and_scores() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader);

    let csv = seeded.workspace.join("math.csv");
    std::fs::write(
        &csv,
        "STUDENT REGISTER ID,STUDENT NAME,TEST 1,TEST 2,EXAM\n\
         S1,Ann Bell,50,30,90\n\
         S2,Ben Cole,30,30,70\n",
    )
    .expect("write csv");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "scores.uploadSubject",
        json!({
            "filePath": csv.to_string_lossy(),
            "classId": seeded.class_id,
            "subjectName": "Mathematics",
            "term": "First Term",
            "academicYear": "2025/2026",
        }),
    );
    assert_eq!(result["subjectName"], json!("Mathematics"));
    assert_eq!(result["applied"]["students"], json!(2));
    assert_eq!(result["applied"]["createdStudents"], json!(2));
    assert_eq!(result["applied"]["scoreRows"], json!(6));
    let subject_id = result["subjectId"].as_str().expect("subjectId").to_string();

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.list",
        json!({ "classId": seeded.class_id }),
    );
    let students = students["students"].as_array().expect("students array");
    assert_eq!(students.len(), 2);
    assert_eq!(students[0]["studentNo"], json!("S1"));
    assert_eq!(students[0]["name"], json!("Ann Bell"));

    let subjects = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.list",
        json!({ "classId": seeded.class_id }),
    );
    let subjects = subjects["subjects"].as_array().expect("subjects array");
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0]["name"], json!("Mathematics"));

    let ann_id = students[0]["id"].as_str().expect("student id");
    let scores = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scores.list",
        json!({ "studentId": ann_id, "subjectId": subject_id }),
    );
    let scores = scores["scores"].as_array().expect("scores array");
    assert_eq!(scores.len(), 3);
    // Insertion order follows sheet column order.
    assert_eq!(scores[0]["assessmentType"], json!("TEST 1"));
    assert_eq!(scores[0]["score"], json!(50.0));
    assert_eq!(scores[0]["maxScore"], json!(100.0));
    assert_eq!(scores[2]["assessmentType"], json!("EXAM"));

    let _ = child.kill();
}

#[test]
fn reupload_replaces_rather_than_accumulates() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader);

    let csv = seeded.workspace.join("math.csv");
    std::fs::write(
        &csv,
        "STUDENT REGISTER ID,STUDENT NAME,TEST 1,EXAM\nS1,Ann,40,80\n",
    )
    .expect("write csv");

    let params = json!({
        "filePath": csv.to_string_lossy(),
        "classId": seeded.class_id,
        "subjectName": "Mathematics",
        "term": "First Term",
        "academicYear": "2025/2026",
    });
    let first = request_ok(&mut stdin, &mut reader, "1", "scores.uploadSubject", params.clone());
    let subject_id = first["subjectId"].as_str().expect("subjectId").to_string();

    // Same file again: same subject id, same score rows, no duplicates.
    let second = request_ok(&mut stdin, &mut reader, "2", "scores.uploadSubject", params);
    assert_eq!(second["subjectId"].as_str(), Some(subject_id.as_str()));
    assert_eq!(second["applied"]["createdStudents"], json!(0));

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.list",
        json!({ "classId": seeded.class_id }),
    );
    let ann_id = students["students"][0]["id"].as_str().expect("student id");
    let scores = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scores.list",
        json!({ "studentId": ann_id }),
    );
    assert_eq!(scores["scores"].as_array().expect("scores").len(), 2);

    // A changed file replaces the prior rows for the same key.
    std::fs::write(
        &csv,
        "STUDENT REGISTER ID,STUDENT NAME,TEST 1,TEST 2,EXAM\nS1,Ann,10,20,60\n",
    )
    .expect("rewrite csv");
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.uploadSubject",
        json!({
            "filePath": csv.to_string_lossy(),
            "classId": seeded.class_id,
            "subjectName": "Mathematics",
            "term": "First Term",
            "academicYear": "2025/2026",
        }),
    );
    let scores = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scores.list",
        json!({ "studentId": ann_id }),
    );
    let scores = scores["scores"].as_array().expect("scores");
    assert_eq!(scores.len(), 3);
    assert_eq!(scores[0]["score"], json!(10.0));

    // A different term is a different key and coexists.
    std::fs::write(
        &csv,
        "STUDENT REGISTER ID,STUDENT NAME,TEST 1,EXAM\nS1,Ann,15,65\n",
    )
    .expect("rewrite csv");
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "scores.uploadSubject",
        json!({
            "filePath": csv.to_string_lossy(),
            "classId": seeded.class_id,
            "subjectName": "Mathematics",
            "term": "Second Term",
            "academicYear": "2025/2026",
        }),
    );
    let scores = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "scores.list",
        json!({ "studentId": ann_id }),
    );
    assert_eq!(scores["scores"].as_array().expect("scores").len(), 5);
    let second_term_only = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "scores.list",
        json!({ "studentId": ann_id, "term": "Second Term" }),
    );
    assert_eq!(second_term_only["scores"].as_array().expect("scores").len(), 2);

    let _ = child.kill();
}

#[test]
fn attendance_column_is_stored_on_the_student() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader);

    let csv = seeded.workspace.join("math.csv");
    std::fs::write(
        &csv,
        "STUDENT REGISTER ID,STUDENT NAME,ATTENDANCE,EXAM\nS1,Ann,104,80\n",
    )
    .expect("write csv");
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "scores.uploadSubject",
        json!({
            "filePath": csv.to_string_lossy(),
            "classId": seeded.class_id,
            "subjectName": "Mathematics",
            "term": "First Term",
            "academicYear": "2025/2026",
        }),
    );

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.list",
        json!({ "classId": seeded.class_id }),
    );
    assert_eq!(students["students"][0]["attendance"], json!(104));

    let _ = child.kill();
}
