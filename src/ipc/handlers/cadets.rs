use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};

fn list_cadets(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, serial, sqn, rank, full_name
             FROM cadets
             ORDER BY full_name, id",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let cadets = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "serial": r.get::<_, Option<String>>(1)?,
                "sqn": r.get::<_, String>(2)?,
                "rank": r.get::<_, String>(3)?,
                "fullName": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "cadets": cadets }))
}

fn create_cadet(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let serial = required_str(params, "serial")?;
    let sqn = required_str(params, "sqn")?;
    let rank = required_str(params, "rank")?;
    let full_name = required_str(params, "fullName")?;

    let cadet_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO cadets(id, serial, sqn, rank, full_name) VALUES(?, ?, ?, ?, ?)",
        (&cadet_id, &serial, &sqn, &rank, &full_name),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(json!({
        "id": cadet_id,
        "serial": serial,
        "sqn": sqn,
        "rank": rank,
        "fullName": full_name,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cadets.list" => {
            if let Err(resp) = authorize(state, req, Capability::Authenticated) {
                return Some(resp);
            }
            let conn = match db_conn(state) {
                Ok(c) => c,
                Err(e) => return Some(e.response(&req.id)),
            };
            Some(match list_cadets(conn) {
                Ok(body) => ok(&req.id, body),
                Err(e) => e.response(&req.id),
            })
        }
        "cadets.create" => {
            if let Err(resp) = authorize(state, req, Capability::Admin) {
                return Some(resp);
            }
            let conn = match db_conn(state) {
                Ok(c) => c,
                Err(e) => return Some(e.response(&req.id)),
            };
            Some(match create_cadet(conn, &req.params) {
                Ok(body) => ok(&req.id, body),
                Err(e) => e.response(&req.id),
            })
        }
        _ => None,
    }
}
