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

fn request(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "request failed: {}",
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, String) {
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
        json!({ "name": "Hillcrest" }),
    );
    let school_id = school["schoolId"].as_str().expect("schoolId").to_string();
    let class = request_ok(
        stdin,
        reader,
        "s3",
        "classes.create",
        json!({ "schoolId": school_id, "name": "JSS 1A" }),
    );
    (
        school_id,
        class["classId"].as_str().expect("classId").to_string(),
    )
}

#[test]
fn subject_names_come_from_file_stems() {
    let workspace = temp_dir("reportcard-bulk");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (_school_id, class_id) = seed(&mut stdin, &mut reader, &workspace);

    let math = workspace.join("Mathematics.csv");
    std::fs::write(
        &math,
        "STUDENT REGISTER ID,STUDENT NAME,TEST 1,EXAM\nS1,Ann,40,80\nS2,Ben,30,60\n",
    )
    .expect("write math");
    let english = workspace.join("English.csv");
    std::fs::write(
        &english,
        "STUDENT REGISTER ID,STUDENT NAME,TEST 1,EXAM\nS1,Ann,35,70\nS2,Ben,45,90\n",
    )
    .expect("write english");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "scores.uploadBulk",
        json!({
            "filePaths": [math.to_string_lossy(), english.to_string_lossy()],
            "classId": class_id,
            "term": "First Term",
            "academicYear": "2025/2026",
        }),
    );
    let files = result["files"].as_array().expect("files");
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["subjectName"], json!("Mathematics"));
    assert_eq!(files[1]["subjectName"], json!("English"));
    assert_eq!(files[0]["applied"]["students"], json!(2));

    let subjects = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.list",
        json!({ "classId": class_id }),
    );
    let names: Vec<&str> = subjects["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .map(|s| s["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["Mathematics", "English"]);

    // Students are shared across the two files, not duplicated.
    let students = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(students["students"].as_array().expect("students").len(), 2);

    let _ = child.kill();
}

#[test]
fn one_invalid_file_rejects_the_whole_batch_before_any_write() {
    let workspace = temp_dir("reportcard-bulk");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (_school_id, class_id) = seed(&mut stdin, &mut reader, &workspace);

    let good = workspace.join("Mathematics.csv");
    std::fs::write(
        &good,
        "STUDENT REGISTER ID,STUDENT NAME,EXAM\nS1,Ann,80\n",
    )
    .expect("write good");
    let bad = workspace.join("English.csv");
    std::fs::write(
        &bad,
        "STUDENT REGISTER ID,STUDENT NAME,EXAM\nS1,Ann,not-a-score\n",
    )
    .expect("write bad");

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "scores.uploadBulk",
        json!({
            "filePaths": [good.to_string_lossy(), bad.to_string_lossy()],
            "classId": class_id,
            "term": "First Term",
            "academicYear": "2025/2026",
        }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("validation_failed"));
    let files = resp["error"]["details"]["files"].as_array().expect("files");
    assert_eq!(files.len(), 1);
    assert!(files[0]["file"]
        .as_str()
        .expect("file")
        .ends_with("English.csv"));

    // Nothing was written, the valid file included.
    let subjects = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(subjects["subjects"].as_array().expect("subjects").len(), 0);

    let _ = child.kill();
}

#[test]
fn reuploaded_student_migrates_to_the_new_class() {
    let workspace = temp_dir("reportcard-bulk");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (school_id, class_a) = seed(&mut stdin, &mut reader, &workspace);
    let class_b = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({ "schoolId": school_id, "name": "JSS 1B" }),
    );
    let class_b = class_b["classId"].as_str().expect("classId").to_string();

    let csv = workspace.join("Mathematics.csv");
    std::fs::write(
        &csv,
        "STUDENT REGISTER ID,STUDENT NAME,EXAM\nS1,Ann Bell,80\n",
    )
    .expect("write csv");
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.uploadBulk",
        json!({
            "filePaths": [csv.to_string_lossy()],
            "classId": class_a,
            "term": "First Term",
            "academicYear": "2025/2026",
        }),
    );

    // Same student number uploaded under a different class with a corrected
    // name: the student moves, no duplicate appears.
    std::fs::write(
        &csv,
        "STUDENT REGISTER ID,STUDENT NAME,EXAM\nS1,Ann Bell-Smith,85\n",
    )
    .expect("rewrite csv");
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scores.uploadBulk",
        json!({
            "filePaths": [csv.to_string_lossy()],
            "classId": class_b,
            "term": "First Term",
            "academicYear": "2025/2026",
        }),
    );

    let in_a = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({ "classId": class_a }),
    );
    assert_eq!(in_a["students"].as_array().expect("students").len(), 0);
    let in_b = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "classId": class_b }),
    );
    let in_b = in_b["students"].as_array().expect("students");
    assert_eq!(in_b.len(), 1);
    assert_eq!(in_b[0]["name"], json!("Ann Bell-Smith"));

    let _ = child.kill();
}
