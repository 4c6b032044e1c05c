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
    let exe = env!("CARGO_BIN_EXE_tutord");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tutord");
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
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

fn sheet_len(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    entity: &str,
) -> usize {
    request_ok(stdin, reader, id, "sheets.load", json!({ "entity": entity }))
        .get("rows")
        .and_then(|v| v.as_array())
        .map(|v| v.len())
        .unwrap_or(0)
}

#[test]
fn student_crud_and_delete_removes_references() {
    let workspace = temp_dir("tutord-students");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class_id = str_field(
        &request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "school": "North" })),
        "classId",
    );
    let s1 = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "students.create",
            json!({ "name": "Ada", "school": "North", "generation": "12", "enrollmentDate": "2024-09-01" }),
        ),
        "studentId",
    );
    let s2 = str_field(
        &request_ok(&mut stdin, &mut reader, "4", "students.create", json!({ "name": "Bo" })),
        "studentId",
    );

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "name": "Cy", "status": "retired" }),
    );
    assert_eq!(bad_status.get("ok").and_then(|v| v.as_bool()), Some(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({ "studentId": s2, "patch": { "name": "Bob", "status": "inactive" } }),
    );
    let inactive = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.list",
        json!({ "status": "inactive" }),
    );
    let inactive = inactive
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(inactive.len(), 1);
    assert_eq!(str_field(&inactive[0], "name"), "Bob");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "enrollments.create",
        json!({ "studentId": s1, "classId": class_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.record",
        json!({
            "classId": class_id,
            "date": "2025-03-03",
            "entries": [ { "studentId": s1, "status": "present" } ]
        }),
    );
    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "exams.submit",
        json!({ "title": "Quiz", "class_id": class_id, "problems": [ { "title": "Q1", "max_score": 5 } ] }),
    );
    let exam_id = str_field(&exam, "examId");
    let detail = request_ok(&mut stdin, &mut reader, "11", "exams.detail", json!({ "examId": exam_id }));
    let p1 = str_field(&detail["problems"][0], "problemId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "scores.save",
        json!({ "exam_id": exam_id, "scores": [ { "student_id": s1, "problem_id": p1, "score": 4, "comment": "" } ] }),
    );

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "students.delete",
        json!({ "studentId": s1 }),
    );
    assert_eq!(deleted["removed"]["scores"].as_u64(), Some(1));
    assert_eq!(deleted["removed"]["enrollments"].as_u64(), Some(1));
    assert_eq!(deleted["removed"]["attendance"].as_u64(), Some(1));

    assert_eq!(sheet_len(&mut stdin, &mut reader, "14", "students"), 1);
    assert_eq!(sheet_len(&mut stdin, &mut reader, "15", "scores"), 0);
    assert_eq!(sheet_len(&mut stdin, &mut reader, "16", "enrollments"), 0);
    assert_eq!(sheet_len(&mut stdin, &mut reader, "17", "attendance"), 0);

    let again = request(
        &mut stdin,
        &mut reader,
        "18",
        "students.delete",
        json!({ "studentId": s1 }),
    );
    assert_eq!(again["error"]["code"].as_str(), Some("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}
