use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};

/// Attended-duty counts per user. Correlated subqueries keep members with
/// zero duties in the result with zero counts.
fn duty_stats(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               u.id,
               u.full_name,
               (SELECT COUNT(*) FROM duty_rota d
                 WHERE d.actual_senior_id = u.id AND d.senior_status = 'ATTENDED'),
               (SELECT COUNT(*) FROM duty_rota d
                 WHERE d.actual_junior_id = u.id AND d.junior_status = 'ATTENDED')
             FROM users u
             ORDER BY u.full_name, u.username",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let stats = stmt
        .query_map([], |r| {
            let senior: i64 = r.get(2)?;
            let junior: i64 = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "seniorDuties": senior,
                "juniorDuties": junior,
                "totalDuties": senior + junior,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "stats": stats }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if req.method != "stats.duties" {
        return None;
    }
    if let Err(resp) = authorize(state, req, Capability::Admin) {
        return Some(resp);
    }
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return Some(e.response(&req.id)),
    };
    Some(match duty_stats(conn) {
        Ok(body) => ok(&req.id, body),
        Err(e) => e.response(&req.id),
    })
}
