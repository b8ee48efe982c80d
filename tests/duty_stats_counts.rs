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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn stat_for<'a>(stats: &'a [serde_json::Value], user_id: &str) -> &'a serde_json::Value {
    stats
        .iter()
        .find(|s| s["id"].as_str() == Some(user_id))
        .expect("user present in stats")
}

#[test]
fn attended_counts_per_role_and_zero_rows_kept() {
    let workspace = temp_dir("portal-duty-stats");
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

    let mut ids = Vec::new();
    for (i, (name, username)) in [
        ("Alice Archer", "alice"),
        ("Bob Barker", "bob"),
        ("Chris Cole", "chris"),
    ]
    .iter()
    .enumerate()
    {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("u{}", i),
            "users.create",
            json!({
                "fullName": name,
                "username": username,
                "password": "squadron-pw-1",
                "role": "USER",
            }),
        );
        ids.push(res["id"].as_str().expect("user id").to_string());
    }
    let (alice, bob, chris) = (&ids[0], &ids[1], &ids[2]);

    // Two attended duty days for Alice as senior; Bob attended one as
    // junior and was unconfirmed on the other.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "duties.upsert",
        json!({
            "dutyDate": "2025-04-05",
            "actualSeniorId": alice,
            "actualJuniorId": bob,
            "seniorStatus": "ATTENDED",
            "juniorStatus": "ATTENDED",
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d2",
        "duties.upsert",
        json!({
            "dutyDate": "2025-04-12",
            "actualSeniorId": alice,
            "actualJuniorId": bob,
            "seniorStatus": "ATTENDED",
        }),
    );

    let res = request_ok(&mut stdin, &mut reader, "stats", "stats.duties", json!({}));
    let stats = res["stats"].as_array().expect("stats array");

    let a = stat_for(stats, alice);
    assert_eq!(a["seniorDuties"], json!(2));
    assert_eq!(a["juniorDuties"], json!(0));
    assert_eq!(a["totalDuties"], json!(2));

    let b = stat_for(stats, bob);
    assert_eq!(b["seniorDuties"], json!(0));
    assert_eq!(b["juniorDuties"], json!(1));
    assert_eq!(b["totalDuties"], json!(1));

    // Never rostered: still listed, all zeroes.
    let c = stat_for(stats, chris);
    assert_eq!(c["seniorDuties"], json!(0));
    assert_eq!(c["juniorDuties"], json!(0));
    assert_eq!(c["totalDuties"], json!(0));
}
