use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const CRITERIA: [&str; 13] = [
    "firstClassLogbookCompleted",
    "basicCyberSecurityVideoWatched",
    "correctUseOfBothFullCallsigns",
    "authenticateRequested",
    "authenticateAnsweredCorrectly",
    "radioCheckRequested",
    "radioCheckAnsweredCorrectly",
    "tacticalMessageFullyAnswered",
    "iSayAgainUsedCorrectly",
    "sayAgainUsed",
    "prowordKnowledgeCompletedOK",
    "securityKnowledgeCompletedOK",
    "generalOperatingAndConfidence",
];

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

fn setup_cohort(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "login",
        "session.login",
        json!({ "username": "admin", "password": "ChangeMe!Now1" }),
    );
    let cohort = request_ok(
        stdin,
        reader,
        "cohort",
        "assessments.cohorts.create",
        json!({
            "name": "Autumn BRO",
            "type": "BRO",
            "instructorName": "Sgt Hale",
            "instructorSqn": "101",
            "assessorName": "FS Okafor",
            "assessorSqn": "101",
        }),
    );
    cohort["id"].as_str().expect("cohort id").to_string()
}

#[test]
fn fresh_cadet_is_all_pending_and_not_passed() {
    let workspace = temp_dir("portal-assess-fresh");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let cohort_id = setup_cohort(&mut stdin, &mut reader, &workspace);

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "add",
        "assessments.addCadet",
        json!({
            "cohortId": cohort_id,
            "sqn": "101",
            "rank": "Cdt",
            "fullName": "Dana Price",
        }),
    );
    let assessment_id = added["assessmentId"].as_str().expect("assessment id");

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "assessments.cohortOpen",
        json!({ "cohortId": cohort_id }),
    );
    let rows = opened["assessments"].as_array().expect("assessments");
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["id"].as_str(), Some(assessment_id));
    assert_eq!(row["passFail"], json!(false));
    for key in CRITERIA {
        assert_eq!(row[key], json!("PENDING"), "criterion {}", key);
    }
}

#[test]
fn pass_fail_is_true_iff_all_thirteen_pass() {
    let workspace = temp_dir("portal-assess-aggregate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let cohort_id = setup_cohort(&mut stdin, &mut reader, &workspace);

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "add",
        "assessments.addCadet",
        json!({
            "cohortId": cohort_id,
            "sqn": "101",
            "rank": "Cdt",
            "fullName": "Eli Fox",
        }),
    );
    let assessment_id = added["assessmentId"].as_str().expect("assessment id");

    // Twelve of thirteen: still not passed.
    for (i, key) in CRITERIA.iter().take(12).enumerate() {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "assessments.setCriterion",
            json!({ "assessmentId": assessment_id, "criterion": key, "status": "PASS" }),
        );
        assert_eq!(res["passFail"], json!(false), "after {} passes", i + 1);
    }

    // The thirteenth tips the aggregate.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "c12",
        "assessments.setCriterion",
        json!({ "assessmentId": assessment_id, "criterion": CRITERIA[12], "status": "PASS" }),
    );
    assert_eq!(res["passFail"], json!(true));

    // Idempotent: repeating the same write leaves the aggregate alone.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "c12b",
        "assessments.setCriterion",
        json!({ "assessmentId": assessment_id, "criterion": CRITERIA[12], "status": "PASS" }),
    );
    assert_eq!(res["passFail"], json!(true));

    // One FAIL drops it back.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "fail",
        "assessments.setCriterion",
        json!({ "assessmentId": assessment_id, "criterion": "sayAgainUsed", "status": "FAIL" }),
    );
    assert_eq!(res["passFail"], json!(false));

    // So does one PENDING.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "repass",
        "assessments.setCriterion",
        json!({ "assessmentId": assessment_id, "criterion": "sayAgainUsed", "status": "PASS" }),
    );
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "pend",
        "assessments.setCriterion",
        json!({ "assessmentId": assessment_id, "criterion": "radioCheckRequested", "status": "PENDING" }),
    );
    assert_eq!(res["passFail"], json!(false));
}

#[test]
fn unknown_criterion_and_status_are_rejected() {
    let workspace = temp_dir("portal-assess-validate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let cohort_id = setup_cohort(&mut stdin, &mut reader, &workspace);
    let added = request_ok(
        &mut stdin,
        &mut reader,
        "add",
        "assessments.addCadet",
        json!({
            "cohortId": cohort_id,
            "sqn": "101",
            "rank": "Cdt",
            "fullName": "Finn Gray",
        }),
    );
    let assessment_id = added["assessmentId"].as_str().expect("assessment id");

    let resp = request(
        &mut stdin,
        &mut reader,
        "badkey",
        "assessments.setCriterion",
        json!({ "assessmentId": assessment_id, "criterion": "secretHandshake", "status": "PASS" }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_params"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "badstatus",
        "assessments.setCriterion",
        json!({ "assessmentId": assessment_id, "criterion": "sayAgainUsed", "status": "MAYBE" }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_params"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "missing",
        "assessments.setCriterion",
        json!({ "assessmentId": "no-such-row", "criterion": "sayAgainUsed", "status": "PASS" }),
    );
    assert_eq!(resp["error"]["code"], json!("not_found"));
}
