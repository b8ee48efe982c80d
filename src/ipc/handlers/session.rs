use rusqlite::OptionalExtension;
use serde_json::json;

use crate::auth::{self, Role};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request, SessionUser};

fn user_json(user: &SessionUser) -> serde_json::Value {
    json!({
        "id": user.id,
        "username": user.username,
        "fullName": user.full_name,
        "role": user.role.as_str(),
    })
}

fn login(state: &AppState, params: &serde_json::Value) -> Result<SessionUser, HandlerErr> {
    let conn = db_conn(state)?;
    let username = required_str(params, "username")?;
    let password = required_str(params, "password")?;

    let row = conn
        .query_row(
            "SELECT id, username, full_name, password_hash, password_salt, role
             FROM users
             WHERE username = ?",
            [&username],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    // One message for both unknown-user and wrong-password; do not leak
    // which half failed.
    let Some((id, username, full_name, stored_hash, salt, role_raw)) = row else {
        return Err(HandlerErr::new(
            "unauthenticated",
            "invalid username or password",
        ));
    };
    if !auth::verify_password(&password, &salt, &stored_hash) {
        return Err(HandlerErr::new(
            "unauthenticated",
            "invalid username or password",
        ));
    }
    let role = Role::parse(&role_raw)
        .ok_or_else(|| HandlerErr::new("db_query_failed", format!("bad role: {}", role_raw)))?;

    Ok(SessionUser {
        id,
        username,
        full_name,
        role,
    })
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    match login(state, &req.params) {
        Ok(user) => {
            let body = user_json(&user);
            state.session = Some(user);
            ok(&req.id, json!({ "user": body }))
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.session = None;
    ok(&req.id, json!({ "ok": true }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.session.as_ref() {
        Some(user) => ok(&req.id, json!({ "user": user_json(user) })),
        None => ok(&req.id, json!({ "user": null })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.login" => Some(handle_login(state, req)),
        "session.logout" => Some(handle_logout(state, req)),
        "session.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
