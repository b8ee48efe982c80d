use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::Role;
use crate::duty;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request, SessionUser};

fn parse_range(params: &serde_json::Value) -> Result<(String, String), HandlerErr> {
    let start_raw = required_str(params, "startDate")?;
    let end_raw = required_str(params, "endDate")?;
    let start = duty::normalize_date(&start_raw).map_err(HandlerErr::bad_params)?;
    let end = duty::normalize_date(&end_raw).map_err(HandlerErr::bad_params)?;
    if end < start {
        return Err(HandlerErr::bad_params("endDate must not be before startDate"));
    }
    Ok((duty::date_key(start), duty::date_key(end)))
}

/// Absences are owner-editable; admins can edit anyone's.
fn require_owner_or_admin(
    conn: &Connection,
    caller: &SessionUser,
    absence_id: &str,
) -> Result<(), HandlerErr> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT user_id FROM absences WHERE id = ?",
            [absence_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(owner) = owner else {
        return Err(HandlerErr::not_found("absence not found"));
    };
    if owner != caller.id && caller.role != Role::Admin {
        return Err(HandlerErr::forbidden(
            "you do not have permission to modify this absence",
        ));
    }
    Ok(())
}

fn list_absences(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.user_id, u.full_name, a.start_date, a.end_date, a.reason
             FROM absences a
             JOIN users u ON u.id = a.user_id
             ORDER BY a.start_date DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let absences = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "userId": r.get::<_, String>(1)?,
                "userFullName": r.get::<_, String>(2)?,
                "startDate": r.get::<_, String>(3)?,
                "endDate": r.get::<_, String>(4)?,
                "reason": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "absences": absences }))
}

fn create_absence(
    conn: &Connection,
    caller: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (start_date, end_date) = parse_range(params)?;
    let reason = optional_str(params, "reason");

    let absence_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO absences(id, user_id, start_date, end_date, reason)
         VALUES(?, ?, ?, ?, ?)",
        (&absence_id, &caller.id, &start_date, &end_date, &reason),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(json!({
        "id": absence_id,
        "userId": caller.id,
        "startDate": start_date,
        "endDate": end_date,
        "reason": reason,
    }))
}

fn update_absence(
    conn: &Connection,
    caller: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let absence_id = required_str(params, "absenceId")?;
    require_owner_or_admin(conn, caller, &absence_id)?;
    let (start_date, end_date) = parse_range(params)?;
    let reason = optional_str(params, "reason");

    conn.execute(
        "UPDATE absences SET start_date = ?, end_date = ?, reason = ? WHERE id = ?",
        (&start_date, &end_date, &reason, &absence_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    Ok(json!({
        "id": absence_id,
        "startDate": start_date,
        "endDate": end_date,
        "reason": reason,
    }))
}

fn delete_absence(
    conn: &Connection,
    caller: &SessionUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let absence_id = required_str(params, "absenceId")?;
    require_owner_or_admin(conn, caller, &absence_id)?;
    conn.execute("DELETE FROM absences WHERE id = ?", [&absence_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "absences.list" | "absences.create" | "absences.update" | "absences.delete"
    ) {
        return None;
    }

    let caller = match authorize(state, req, Capability::Authenticated) {
        Ok(u) => u.clone(),
        Err(resp) => return Some(resp),
    };
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return Some(e.response(&req.id)),
    };
    let result = match req.method.as_str() {
        "absences.list" => list_absences(conn),
        "absences.create" => create_absence(conn, &caller, &req.params),
        "absences.update" => update_absence(conn, &caller, &req.params),
        _ => delete_absence(conn, &caller, &req.params),
    };
    Some(match result {
        Ok(body) => ok(&req.id, body),
        Err(e) => e.response(&req.id),
    })
}
