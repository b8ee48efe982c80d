use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, Role, MIN_PASSWORD_LEN};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::helpers::{db_conn, is_constraint_violation, required_str};
use crate::ipc::types::{AppState, Request};

fn parse_role(params: &serde_json::Value) -> Result<Role, HandlerErr> {
    let raw = required_str(params, "role")?;
    Role::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("role must be USER or ADMIN"))
}

fn require_password(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let password = required_str(params, "password")?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(HandlerErr::bad_params(format!(
            "password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(password)
}

fn list_users(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, username, full_name, role, created_at
             FROM users
             ORDER BY full_name, username",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let users = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "username": r.get::<_, String>(1)?,
                "fullName": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "users": users }))
}

fn create_user(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let full_name = required_str(params, "fullName")?;
    let username = required_str(params, "username")?;
    let password = require_password(params)?;
    let role = parse_role(params)?;

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [&username], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if taken.is_some() {
        return Err(HandlerErr::conflict("username already taken"));
    }

    let user_id = Uuid::new_v4().to_string();
    let salt = auth::new_salt();
    let hash = auth::hash_password(&password, &salt);
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users(id, username, full_name, password_hash, password_salt, role, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &username,
            &full_name,
            &hash,
            &salt,
            role.as_str(),
            &created_at,
        ),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            // Lost the race against a concurrent create.
            HandlerErr::conflict("username already taken")
        } else {
            HandlerErr::db("db_insert_failed", e)
        }
    })?;

    Ok(json!({
        "id": user_id,
        "username": username,
        "fullName": full_name,
        "role": role.as_str(),
        "createdAt": created_at,
    }))
}

fn update_user(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let full_name = required_str(params, "fullName")?;
    let role = parse_role(params)?;

    let changed = conn
        .execute(
            "UPDATE users SET full_name = ?, role = ? WHERE id = ?",
            (&full_name, role.as_str(), &user_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    Ok(json!({ "id": user_id, "fullName": full_name, "role": role.as_str() }))
}

fn set_password(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let password = require_password(params)?;

    let salt = auth::new_salt();
    let hash = auth::hash_password(&password, &salt);
    let changed = conn
        .execute(
            "UPDATE users SET password_hash = ?, password_salt = ? WHERE id = ?",
            (&hash, &salt, &user_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Remove a user and everything hanging off them in one transaction:
/// lesson assignments, duty rows they appear in (any of the four role
/// columns), and their absences. Authored lessons and contributed
/// uniform items survive with the author column cleared.
fn delete_user(
    conn: &Connection,
    caller_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    if user_id == caller_id {
        return Err(HandlerErr::forbidden("you cannot delete your own account"));
    }

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("user not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let steps: [(&str, &str); 6] = [
        (
            "DELETE FROM lesson_assignments WHERE user_id = ?",
            "lesson_assignments",
        ),
        (
            "DELETE FROM duty_rota
             WHERE original_senior_id = ? OR original_junior_id = ?
                OR actual_senior_id = ? OR actual_junior_id = ?",
            "duty_rota",
        ),
        ("DELETE FROM absences WHERE user_id = ?", "absences"),
        (
            "UPDATE lessons SET created_by_id = NULL WHERE created_by_id = ?",
            "lessons",
        ),
        (
            "UPDATE uniform_items SET added_by_id = NULL WHERE added_by_id = ?",
            "uniform_items",
        ),
        ("DELETE FROM users WHERE id = ?", "users"),
    ];
    for (sql, table) in steps {
        let res = if table == "duty_rota" {
            tx.execute(sql, (&user_id, &user_id, &user_id, &user_id))
        } else {
            tx.execute(sql, [&user_id])
        };
        if let Err(e) = res {
            let _ = tx.rollback();
            return Err(
                HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table })),
            );
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "users.list" | "users.create" | "users.update" | "users.setPassword" | "users.delete"
    ) {
        return None;
    }

    let caller = match authorize(state, req, Capability::Admin) {
        Ok(u) => u.clone(),
        Err(resp) => return Some(resp),
    };
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return Some(e.response(&req.id)),
    };
    let result = match req.method.as_str() {
        "users.list" => list_users(conn),
        "users.create" => create_user(conn, &req.params),
        "users.update" => update_user(conn, &req.params),
        "users.setPassword" => set_password(conn, &req.params),
        _ => delete_user(conn, &caller.id, &req.params),
    };
    Some(match result {
        Ok(body) => ok(&req.id, body),
        Err(e) => e.response(&req.id),
    })
}
