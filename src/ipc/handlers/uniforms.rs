use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};

fn list_items(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT i.id, i.type, i.size, i.condition, i.added_at,
                    (SELECT u.full_name FROM users u WHERE u.id = i.added_by_id)
             FROM uniform_items i
             ORDER BY i.added_at DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let items = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "type": r.get::<_, String>(1)?,
                "size": r.get::<_, String>(2)?,
                "condition": r.get::<_, String>(3)?,
                "addedAt": r.get::<_, String>(4)?,
                "addedBy": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "items": items }))
}

fn create_item(
    conn: &Connection,
    caller_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let item_type = required_str(params, "type")?;
    let size = required_str(params, "size")?;
    let condition = required_str(params, "condition")?;

    let item_id = Uuid::new_v4().to_string();
    let added_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO uniform_items(id, type, size, condition, added_by_id, added_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&item_id, &item_type, &size, &condition, caller_id, &added_at),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(json!({
        "id": item_id,
        "type": item_type,
        "size": size,
        "condition": condition,
        "addedAt": added_at,
    }))
}

/// The store is collectively maintained: any signed-in member may remove
/// an item that was handed out.
fn delete_item(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let item_id = required_str(params, "uniformId")?;
    let removed = conn
        .execute("DELETE FROM uniform_items WHERE id = ?", [&item_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("uniform item not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "uniforms.list" | "uniforms.create" | "uniforms.delete"
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
        "uniforms.list" => list_items(conn),
        "uniforms.create" => create_item(conn, &caller.id, &req.params),
        _ => delete_item(conn, &req.params),
    };
    Some(match result {
        Ok(body) => ok(&req.id, body),
        Err(e) => e.response(&req.id),
    })
}
