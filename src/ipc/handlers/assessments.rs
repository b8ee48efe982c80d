use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

use crate::assess::{self, CriterionStatus, ExportCadet, ExportHeader};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::helpers::{db_conn, is_constraint_violation, required_str};
use crate::ipc::types::{AppState, Request};

fn criterion_columns_sql() -> String {
    assess::CRITERIA
        .iter()
        .map(|(_, column)| *column)
        .collect::<Vec<_>>()
        .join(", ")
}

fn statuses_from_row(row: &Row, first_index: usize) -> rusqlite::Result<Vec<CriterionStatus>> {
    let mut statuses = Vec::with_capacity(assess::CRITERIA_COUNT);
    for i in 0..assess::CRITERIA_COUNT {
        let raw: String = row.get(first_index + i)?;
        // CHECK constraints keep stored values in range; anything else
        // reads as PENDING.
        statuses.push(CriterionStatus::parse(&raw).unwrap_or(CriterionStatus::Pending));
    }
    Ok(statuses)
}

fn criteria_json(statuses: &[CriterionStatus]) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for ((wire, _), status) in assess::CRITERIA.iter().zip(statuses) {
        map.insert((*wire).to_string(), json!(status.as_str()));
    }
    map
}

struct CohortRow {
    id: String,
    name: String,
    cohort_type: String,
    instructor_name: String,
    instructor_sqn: String,
    assessor_name: String,
    assessor_sqn: String,
    created_at: String,
}

fn load_cohort(conn: &Connection, cohort_id: &str) -> Result<CohortRow, HandlerErr> {
    conn.query_row(
        "SELECT id, name, type, instructor_name, instructor_sqn,
                assessor_name, assessor_sqn, created_at
         FROM assessment_cohorts WHERE id = ?",
        [cohort_id],
        |r| {
            Ok(CohortRow {
                id: r.get(0)?,
                name: r.get(1)?,
                cohort_type: r.get(2)?,
                instructor_name: r.get(3)?,
                instructor_sqn: r.get(4)?,
                assessor_name: r.get(5)?,
                assessor_sqn: r.get(6)?,
                created_at: r.get(7)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("cohort not found"))
}

fn cohort_json(cohort: &CohortRow) -> serde_json::Value {
    json!({
        "id": cohort.id,
        "name": cohort.name,
        "type": cohort.cohort_type,
        "instructorName": cohort.instructor_name,
        "instructorSqn": cohort.instructor_sqn,
        "assessorName": cohort.assessor_name,
        "assessorSqn": cohort.assessor_sqn,
        "createdAt": cohort.created_at,
    })
}

struct AssessmentRow {
    id: String,
    cadet_id: String,
    serial: Option<String>,
    sqn: String,
    rank: String,
    full_name: String,
    statuses: Vec<CriterionStatus>,
    pass_fail: bool,
}

/// Cohort members in listing order: cadet full name ascending, cadet id
/// as tiebreak, so screen and print always paginate identically.
fn load_cohort_assessments(
    conn: &Connection,
    cohort_id: &str,
) -> Result<Vec<AssessmentRow>, HandlerErr> {
    let sql = format!(
        "SELECT a.id, a.cadet_id, c.serial, c.sqn, c.rank, c.full_name, a.pass_fail, {}
         FROM radio_assessments a
         JOIN cadets c ON c.id = a.cadet_id
         WHERE a.cohort_id = ?
         ORDER BY c.full_name, c.id",
        criterion_columns_sql()
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([cohort_id], |r| {
        Ok(AssessmentRow {
            id: r.get(0)?,
            cadet_id: r.get(1)?,
            serial: r.get(2)?,
            sqn: r.get(3)?,
            rank: r.get(4)?,
            full_name: r.get(5)?,
            pass_fail: r.get::<_, i64>(6)? != 0,
            statuses: statuses_from_row(r, 7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn assessment_row_json(row: &AssessmentRow) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert("id".to_string(), json!(row.id));
    body.insert(
        "cadet".to_string(),
        json!({
            "id": row.cadet_id,
            "serial": row.serial,
            "sqn": row.sqn,
            "rank": row.rank,
            "fullName": row.full_name,
        }),
    );
    body.extend(criteria_json(&row.statuses));
    body.insert("passFail".to_string(), json!(row.pass_fail));
    serde_json::Value::Object(body)
}

fn list_cohorts(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT co.id, co.name, co.type, co.instructor_name, co.instructor_sqn,
                    co.assessor_name, co.assessor_sqn, co.created_at,
                    (SELECT COUNT(*) FROM radio_assessments a WHERE a.cohort_id = co.id)
             FROM assessment_cohorts co
             ORDER BY co.created_at DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let cohorts = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "type": r.get::<_, String>(2)?,
                "instructorName": r.get::<_, String>(3)?,
                "instructorSqn": r.get::<_, String>(4)?,
                "assessorName": r.get::<_, String>(5)?,
                "assessorSqn": r.get::<_, String>(6)?,
                "createdAt": r.get::<_, String>(7)?,
                "assessmentCount": r.get::<_, i64>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "cohorts": cohorts }))
}

fn create_cohort(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let cohort_type = required_str(params, "type")?;
    let instructor_name = required_str(params, "instructorName")?;
    let instructor_sqn = required_str(params, "instructorSqn")?;
    let assessor_name = required_str(params, "assessorName")?;
    let assessor_sqn = required_str(params, "assessorSqn")?;

    let cohort_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO assessment_cohorts(
            id, name, type, instructor_name, instructor_sqn,
            assessor_name, assessor_sqn, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &cohort_id,
            &name,
            &cohort_type,
            &instructor_name,
            &instructor_sqn,
            &assessor_name,
            &assessor_sqn,
            &created_at,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(json!({ "id": cohort_id, "name": name, "createdAt": created_at }))
}

fn cohort_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cohort_id = required_str(params, "cohortId")?;
    let cohort = load_cohort(conn, &cohort_id)?;
    let assessments: Vec<serde_json::Value> = load_cohort_assessments(conn, &cohort_id)?
        .iter()
        .map(assessment_row_json)
        .collect();
    Ok(json!({
        "cohort": cohort_json(&cohort),
        "assessments": assessments,
    }))
}

/// New cadet plus their zero-state assessment in one transaction: both
/// rows exist afterwards or neither does.
fn add_cadet(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cohort_id = required_str(params, "cohortId")?;
    let sqn = required_str(params, "sqn")?;
    let rank = required_str(params, "rank")?;
    let full_name = required_str(params, "fullName")?;
    load_cohort(conn, &cohort_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let cadet_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO cadets(id, serial, sqn, rank, full_name) VALUES(?, NULL, ?, ?, ?)",
        (&cadet_id, &sqn, &rank, &full_name),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "cadets" })));
    }

    let assessment_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO radio_assessments(id, cohort_id, cadet_id) VALUES(?, ?, ?)",
        (&assessment_id, &cohort_id, &cadet_id),
    ) {
        let _ = tx.rollback();
        return Err(
            HandlerErr::db("db_insert_failed", e)
                .with_details(json!({ "table": "radio_assessments" })),
        );
    }

    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({
        "assessmentId": assessment_id,
        "cadetId": cadet_id,
        "cohortId": cohort_id,
    }))
}

/// Enrol an existing cadet (from the register) into a cohort. A cadet can
/// hold one assessment per cohort; a second enrolment is a conflict.
fn enroll_cadet(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cohort_id = required_str(params, "cohortId")?;
    let cadet_id = required_str(params, "cadetId")?;
    load_cohort(conn, &cohort_id)?;
    let cadet_known: Option<i64> = conn
        .query_row("SELECT 1 FROM cadets WHERE id = ?", [&cadet_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if cadet_known.is_none() {
        return Err(HandlerErr::not_found("cadet not found"));
    }

    let assessment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO radio_assessments(id, cohort_id, cadet_id) VALUES(?, ?, ?)",
        (&assessment_id, &cohort_id, &cadet_id),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            HandlerErr::conflict("cadet is already enrolled in this cohort")
        } else {
            HandlerErr::db("db_insert_failed", e)
        }
    })?;

    Ok(json!({
        "assessmentId": assessment_id,
        "cadetId": cadet_id,
        "cohortId": cohort_id,
    }))
}

/// Drops the assessment row only; the cadet's identity record stays for
/// future cohorts.
fn remove_cadet(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assessment_id = required_str(params, "assessmentId")?;
    let removed = conn
        .execute(
            "DELETE FROM radio_assessments WHERE id = ?",
            [&assessment_id],
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("assessment not found"));
    }
    Ok(json!({ "ok": true }))
}

fn result_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assessment_id = required_str(params, "assessmentId")?;
    let sql = format!(
        "SELECT a.id, a.cohort_id, a.cadet_id, c.serial, c.sqn, c.rank, c.full_name,
                a.pass_fail, {}
         FROM radio_assessments a
         JOIN cadets c ON c.id = a.cadet_id
         WHERE a.id = ?",
        criterion_columns_sql()
    );
    let row = conn
        .query_row(&sql, [&assessment_id], |r| {
            Ok((
                r.get::<_, String>(1)?,
                AssessmentRow {
                    id: r.get(0)?,
                    cadet_id: r.get(2)?,
                    serial: r.get(3)?,
                    sqn: r.get(4)?,
                    rank: r.get(5)?,
                    full_name: r.get(6)?,
                    pass_fail: r.get::<_, i64>(7)? != 0,
                    statuses: statuses_from_row(r, 8)?,
                },
            ))
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((cohort_id, assessment)) = row else {
        return Err(HandlerErr::not_found("assessment not found"));
    };
    let cohort = load_cohort(conn, &cohort_id)?;
    let mut body = assessment_row_json(&assessment);
    body["cohort"] = cohort_json(&cohort);
    Ok(body)
}

/// Update one criterion and re-derive the aggregate from the full
/// criterion set in memory, persisting both in a single write. No reader
/// can observe the new criterion with a stale passFail.
fn set_criterion(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assessment_id = required_str(params, "assessmentId")?;
    let criterion_key = required_str(params, "criterion")?;
    let status_raw = required_str(params, "status")?;

    let column = assess::criterion_column(&criterion_key).ok_or_else(|| {
        HandlerErr::bad_params(format!("unknown criterion: {}", criterion_key))
    })?;
    let status = CriterionStatus::parse(&status_raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be PASS, FAIL or PENDING")
    })?;

    let sql = format!(
        "SELECT {} FROM radio_assessments WHERE id = ?",
        criterion_columns_sql()
    );
    let statuses = conn
        .query_row(&sql, [&assessment_id], |r| statuses_from_row(r, 0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(mut statuses) = statuses else {
        return Err(HandlerErr::not_found("assessment not found"));
    };

    let index = assess::CRITERIA
        .iter()
        .position(|(wire, _)| *wire == criterion_key)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown criterion: {}", criterion_key)))?;
    statuses[index] = status;
    let pass_fail = assess::overall_pass(&statuses);

    // `column` comes from the fixed criterion table, never from input.
    let update_sql = format!(
        "UPDATE radio_assessments SET {} = ?, pass_fail = ? WHERE id = ?",
        column
    );
    conn.execute(
        &update_sql,
        (status.as_str(), pass_fail as i64, &assessment_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    let mut body = serde_json::Map::new();
    body.insert("id".to_string(), json!(assessment_id));
    body.extend(criteria_json(&statuses));
    body.insert("passFail".to_string(), json!(pass_fail));
    Ok(serde_json::Value::Object(body))
}

/// Review pagination: every cadet, pass or not, ten rows per page.
fn print_layout(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cohort_id = required_str(params, "cohortId")?;
    let cohort = load_cohort(conn, &cohort_id)?;
    let rows = load_cohort_assessments(conn, &cohort_id)?;

    let pages: Vec<serde_json::Value> = rows
        .chunks(assess::ROWS_PER_PAGE)
        .enumerate()
        .map(|(page_index, chunk)| {
            let rows_json: Vec<serde_json::Value> = chunk
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    let mut body = assessment_row_json(row);
                    body["serial"] =
                        json!(page_index * assess::ROWS_PER_PAGE + i + 1);
                    body
                })
                .collect();
            json!({
                "pageNumber": page_index + 1,
                "rows": rows_json,
            })
        })
        .collect();

    Ok(json!({
        "cohort": cohort_json(&cohort),
        "pageCount": assess::page_count(rows.len()),
        "cadetCount": rows.len(),
        "pages": pages,
    }))
}

/// Certificate export: passers only, laid onto the fixed template grid.
fn export_plan(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cohort_id = required_str(params, "cohortId")?;
    let template_pages = match params.get("templatePages") {
        None => assess::DEFAULT_TEMPLATE_PAGES,
        Some(v) => v
            .as_u64()
            .filter(|n| *n > 0)
            .ok_or_else(|| HandlerErr::bad_params("templatePages must be a positive integer"))?
            as usize,
    };
    let cohort = load_cohort(conn, &cohort_id)?;
    let rows = load_cohort_assessments(conn, &cohort_id)?;

    let cadets: Vec<ExportCadet> = rows
        .iter()
        .map(|row| ExportCadet {
            sqn: row.sqn.clone(),
            rank: row.rank.clone(),
            full_name: row.full_name.clone(),
            criteria: row.statuses.clone(),
            passed: row.pass_fail,
        })
        .collect();
    let header = ExportHeader {
        instructor_name: cohort.instructor_name.clone(),
        instructor_sqn: cohort.instructor_sqn.clone(),
        assessor_name: cohort.assessor_name.clone(),
        assessor_sqn: cohort.assessor_sqn.clone(),
    };
    let plan = assess::export_plan(&cadets, &header, template_pages);

    let mut body = serde_json::to_value(&plan)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    body["cohort"] = cohort_json(&cohort);
    body["fileName"] = json!(format!(
        "BRO_Assessment_{}.pdf",
        cohort.name.replace(' ', "_")
    ));
    Ok(body)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let admin_method = matches!(
        req.method.as_str(),
        "assessments.cohorts.create"
            | "assessments.addCadet"
            | "assessments.enrollCadet"
            | "assessments.removeCadet"
    );
    let user_method = matches!(
        req.method.as_str(),
        "assessments.cohorts.list"
            | "assessments.cohortOpen"
            | "assessments.resultGet"
            | "assessments.setCriterion"
            | "assessments.printLayout"
            | "assessments.exportPlan"
    );
    if !admin_method && !user_method {
        return None;
    }

    let cap = if admin_method {
        Capability::Admin
    } else {
        Capability::Authenticated
    };
    if let Err(resp) = authorize(state, req, cap) {
        return Some(resp);
    }
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return Some(e.response(&req.id)),
    };
    let result = match req.method.as_str() {
        "assessments.cohorts.list" => list_cohorts(conn),
        "assessments.cohorts.create" => create_cohort(conn, &req.params),
        "assessments.cohortOpen" => cohort_open(conn, &req.params),
        "assessments.addCadet" => add_cadet(conn, &req.params),
        "assessments.enrollCadet" => enroll_cadet(conn, &req.params),
        "assessments.removeCadet" => remove_cadet(conn, &req.params),
        "assessments.resultGet" => result_get(conn, &req.params),
        "assessments.setCriterion" => set_criterion(conn, &req.params),
        "assessments.printLayout" => print_layout(conn, &req.params),
        _ => export_plan(conn, &req.params),
    };
    Some(match result {
        Ok(body) => ok(&req.id, body),
        Err(e) => e.response(&req.id),
    })
}
