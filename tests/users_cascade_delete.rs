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
    let exe = env!("CARGO_BIN_EXE_sqnportald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sqnportald");
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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
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

#[test]
fn deleting_a_user_cascades_through_their_records() {
    let workspace = temp_dir("portal-user-cascade");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "session.login",
        json!({ "username": "admin", "password": "ChangeMe!Now1" }),
    );

    let dave = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "users.create",
        json!({
            "fullName": "Dave Dunn",
            "username": "dave",
            "password": "squadron-pw-1",
            "role": "USER",
        }),
    )["id"]
        .as_str()
        .expect("user id")
        .to_string();
    let erin = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "users.create",
        json!({
            "fullName": "Erin Epps",
            "username": "erin",
            "password": "squadron-pw-1",
            "role": "USER",
        }),
    )["id"]
        .as_str()
        .expect("user id")
        .to_string();

    // A lesson assignment, a duty row and an absence all pointing at Dave.
    let lesson = request_ok(
        &mut stdin,
        &mut reader,
        "lesson",
        "lessons.create",
        json!({
            "title": "Radio Procedures",
            "lessonDate": "2025-05-10T19:00:00Z",
        }),
    )["id"]
        .as_str()
        .expect("lesson id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "assign",
        "lessons.assign",
        json!({ "lessonId": lesson, "userId": dave }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "duty",
        "duties.upsert",
        json!({
            "dutyDate": "2025-05-17",
            "actualSeniorId": dave,
            "actualJuniorId": erin,
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "dlogin",
        "session.login",
        json!({ "username": "dave", "password": "squadron-pw-1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "absence",
        "absences.create",
        json!({ "startDate": "2025-06-01", "endDate": "2025-06-07", "reason": "exams" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "relogin",
        "session.login",
        json!({ "username": "admin", "password": "ChangeMe!Now1" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "users.delete",
        json!({ "userId": dave }),
    );

    // User row gone.
    let users = request_ok(&mut stdin, &mut reader, "ul", "users.list", json!({}));
    assert!(users["users"]
        .as_array()
        .expect("users")
        .iter()
        .all(|u| u["id"].as_str() != Some(dave.as_str())));

    // Lesson assignment gone, the lesson itself kept.
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "lg",
        "lessons.get",
        json!({ "lessonId": lesson }),
    );
    assert_eq!(detail["assignments"].as_array().map(|a| a.len()), Some(0));

    // Duty row referencing Dave gone with him.
    let duties = request_ok(&mut stdin, &mut reader, "dl", "duties.list", json!({}));
    assert_eq!(duties["duties"].as_array().map(|d| d.len()), Some(0));

    // Absence gone too.
    let absences = request_ok(&mut stdin, &mut reader, "al", "absences.list", json!({}));
    assert_eq!(absences["absences"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn admin_cannot_delete_their_own_account() {
    let workspace = temp_dir("portal-user-self-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "session.login",
        json!({ "username": "admin", "password": "ChangeMe!Now1" }),
    );
    let me = request_ok(&mut stdin, &mut reader, "who", "session.whoami", json!({}));
    let my_id = me["user"]["id"].as_str().expect("own id").to_string();

    let resp = request(
        &mut stdin,
        &mut reader,
        "del",
        "users.delete",
        json!({ "userId": my_id }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("forbidden"));
}
