use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::duty::{self, DutyChange, DutyRecord, DutyStatus};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::helpers::{db_conn, is_constraint_violation, optional_str, required_str, user_exists};
use crate::ipc::types::{AppState, Request};

fn parse_date_param(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let raw = required_str(params, "dutyDate")?;
    let date = duty::normalize_date(&raw).map_err(HandlerErr::bad_params)?;
    Ok(duty::date_key(date))
}

fn parse_status_param(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<DutyStatus>, HandlerErr> {
    match optional_str(params, key) {
        None => Ok(None),
        Some(raw) => DutyStatus::parse(&raw).map(Some).ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "{} must be UNCONFIRMED, ATTENDED or ABSENT",
                key
            ))
        }),
    }
}

struct StoredDutyRow {
    id: String,
    record: DutyRecord,
}

fn load_duty(conn: &Connection, date_key: &str) -> Result<Option<StoredDutyRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, original_senior_id, original_junior_id,
                actual_senior_id, actual_junior_id, senior_status, junior_status
         FROM duty_rota WHERE duty_date = ?",
        [date_key],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
            ))
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .map(|(id, os, oj, asn, ajn, ss, js)| {
        let senior_status = DutyStatus::parse(&ss)
            .ok_or_else(|| HandlerErr::new("db_query_failed", format!("bad status: {}", ss)))?;
        let junior_status = DutyStatus::parse(&js)
            .ok_or_else(|| HandlerErr::new("db_query_failed", format!("bad status: {}", js)))?;
        Ok(StoredDutyRow {
            id,
            record: DutyRecord {
                original_senior_id: os,
                original_junior_id: oj,
                actual_senior_id: asn,
                actual_junior_id: ajn,
                senior_status,
                junior_status,
            },
        })
    })
    .transpose()
}

fn duty_json(conn: &Connection, date_key: &str, record: &DutyRecord) -> Result<serde_json::Value, HandlerErr> {
    let name = |user_id: &str| -> Result<Option<String>, HandlerErr> {
        conn.query_row("SELECT full_name FROM users WHERE id = ?", [user_id], |r| {
            r.get::<_, String>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))
    };
    Ok(json!({
        "dutyDate": date_key,
        "originalSeniorId": record.original_senior_id,
        "originalJuniorId": record.original_junior_id,
        "actualSeniorId": record.actual_senior_id,
        "actualJuniorId": record.actual_junior_id,
        "actualSeniorName": name(&record.actual_senior_id)?,
        "actualJuniorName": name(&record.actual_junior_id)?,
        "seniorStatus": record.senior_status.as_str(),
        "juniorStatus": record.junior_status.as_str(),
        "displayColor": duty::color_for_duty(record.senior_status, record.junior_status),
    }))
}

/// Find-or-create keyed by normalized date. Originals are written on the
/// create path only; the row's unique date constraint settles races.
fn upsert_duty(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date_key = parse_date_param(params)?;

    let change = DutyChange {
        actual_senior_id: required_str(params, "actualSeniorId")?,
        actual_junior_id: required_str(params, "actualJuniorId")?,
        original_senior_id: optional_str(params, "originalSeniorId"),
        original_junior_id: optional_str(params, "originalJuniorId"),
        senior_status: parse_status_param(params, "seniorStatus")?,
        junior_status: parse_status_param(params, "juniorStatus")?,
    };

    let existing = load_duty(conn, &date_key)?;
    let resolved = duty::resolve_upsert(&change, existing.as_ref().map(|row| &row.record))
        .map_err(HandlerErr::bad_params)?;

    for user_id in [
        &resolved.original_senior_id,
        &resolved.original_junior_id,
        &resolved.actual_senior_id,
        &resolved.actual_junior_id,
    ] {
        if !user_exists(conn, user_id)? {
            return Err(
                HandlerErr::bad_params("unknown user id")
                    .with_details(json!({ "userId": user_id })),
            );
        }
    }

    match existing {
        Some(row) => {
            conn.execute(
                "UPDATE duty_rota
                 SET actual_senior_id = ?, actual_junior_id = ?,
                     senior_status = ?, junior_status = ?
                 WHERE id = ?",
                (
                    &resolved.actual_senior_id,
                    &resolved.actual_junior_id,
                    resolved.senior_status.as_str(),
                    resolved.junior_status.as_str(),
                    &row.id,
                ),
            )
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        }
        None => {
            conn.execute(
                "INSERT INTO duty_rota(
                    id, duty_date,
                    original_senior_id, original_junior_id,
                    actual_senior_id, actual_junior_id,
                    senior_status, junior_status)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &date_key,
                    &resolved.original_senior_id,
                    &resolved.original_junior_id,
                    &resolved.actual_senior_id,
                    &resolved.actual_junior_id,
                    resolved.senior_status.as_str(),
                    resolved.junior_status.as_str(),
                ),
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    HandlerErr::conflict("a duty assignment for this date already exists")
                } else {
                    HandlerErr::db("db_insert_failed", e)
                }
            })?;
        }
    }

    duty_json(conn, &date_key, &resolved)
}

fn list_duties(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT d.duty_date,
                    d.original_senior_id, d.original_junior_id,
                    d.actual_senior_id, d.actual_junior_id,
                    d.senior_status, d.junior_status,
                    os.full_name, oj.full_name, s.full_name, j.full_name
             FROM duty_rota d
             JOIN users os ON os.id = d.original_senior_id
             JOIN users oj ON oj.id = d.original_junior_id
             JOIN users s ON s.id = d.actual_senior_id
             JOIN users j ON j.id = d.actual_junior_id
             ORDER BY d.duty_date DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, String>(8)?,
                r.get::<_, String>(9)?,
                r.get::<_, String>(10)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut duties = Vec::with_capacity(rows.len());
    for (date, osid, ojid, asid, ajid, ss, js, os_name, oj_name, s_name, j_name) in rows {
        let senior_status = DutyStatus::parse(&ss)
            .ok_or_else(|| HandlerErr::new("db_query_failed", format!("bad status: {}", ss)))?;
        let junior_status = DutyStatus::parse(&js)
            .ok_or_else(|| HandlerErr::new("db_query_failed", format!("bad status: {}", js)))?;
        duties.push(json!({
            "dutyDate": date,
            "originalSeniorId": osid,
            "originalJuniorId": ojid,
            "actualSeniorId": asid,
            "actualJuniorId": ajid,
            "originalSeniorName": os_name,
            "originalJuniorName": oj_name,
            "actualSeniorName": s_name,
            "actualJuniorName": j_name,
            "seniorStatus": senior_status.as_str(),
            "juniorStatus": junior_status.as_str(),
            "displayColor": duty::color_for_duty(senior_status, junior_status),
        }));
    }
    Ok(json!({ "duties": duties }))
}

fn get_duty(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date_key = parse_date_param(params)?;
    let row = load_duty(conn, &date_key)?
        .ok_or_else(|| HandlerErr::not_found("no duty assignment for this date"))?;
    duty_json(conn, &date_key, &row.record)
}

/// Removes the whole date's row: both roles go together, there is no
/// per-role deletion. Unknown dates are not_found.
fn delete_duty(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date_key = parse_date_param(params)?;
    let removed = conn
        .execute("DELETE FROM duty_rota WHERE duty_date = ?", [&date_key])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("no duty assignment for this date"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "duties.list" | "duties.get" | "duties.upsert" | "duties.delete"
    ) {
        return None;
    }

    if let Err(resp) = authorize(state, req, Capability::Admin) {
        return Some(resp);
    }
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return Some(e.response(&req.id)),
    };
    let result = match req.method.as_str() {
        "duties.list" => list_duties(conn),
        "duties.get" => get_duty(conn, &req.params),
        "duties.upsert" => upsert_duty(conn, &req.params),
        _ => delete_duty(conn, &req.params),
    };
    Some(match result {
        Ok(body) => ok(&req.id, body),
        Err(e) => e.response(&req.id),
    })
}
