use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::helpers::{db_conn, is_constraint_violation, optional_str, required_str, user_exists};
use crate::ipc::types::{AppState, Request};

fn lesson_exists(conn: &Connection, lesson_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM lessons WHERE id = ?", [lesson_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn list_lessons(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               l.id,
               l.title,
               l.description,
               l.lesson_date,
               (SELECT u.full_name FROM users u WHERE u.id = l.created_by_id) AS created_by,
               (SELECT COUNT(*) FROM lesson_assignments a WHERE a.lesson_id = l.id) AS assigned
             FROM lessons l
             ORDER BY l.lesson_date DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let lessons = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "lessonDate": r.get::<_, String>(3)?,
                "createdBy": r.get::<_, Option<String>>(4)?,
                "assignmentCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "lessons": lessons }))
}

fn create_lesson(
    conn: &Connection,
    caller_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = required_str(params, "title")?;
    let lesson_date = required_str(params, "lessonDate")?;
    let description = optional_str(params, "description");

    let lesson_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, title, description, lesson_date, created_by_id)
         VALUES(?, ?, ?, ?, ?)",
        (&lesson_id, &title, &description, &lesson_date, caller_id),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(json!({
        "id": lesson_id,
        "title": title,
        "description": description,
        "lessonDate": lesson_date,
    }))
}

fn get_lesson(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = required_str(params, "lessonId")?;

    let lesson = conn
        .query_row(
            "SELECT id, title, description, lesson_date FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "description": r.get::<_, Option<String>>(2)?,
                    "lessonDate": r.get::<_, String>(3)?,
                }))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("lesson not found"))?;

    let mut stmt = conn
        .prepare(
            "SELECT a.user_id, u.full_name
             FROM lesson_assignments a
             JOIN users u ON u.id = a.user_id
             WHERE a.lesson_id = ?
             ORDER BY u.full_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let assignments = stmt
        .query_map([&lesson_id], |r| {
            Ok(json!({
                "userId": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut stmt = conn
        .prepare(
            "SELECT id, file_name, file_path FROM lesson_resources WHERE lesson_id = ?",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let resources = stmt
        .query_map([&lesson_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fileName": r.get::<_, String>(1)?,
                "filePath": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({
        "lesson": lesson,
        "assignments": assignments,
        "resources": resources,
    }))
}

fn update_lesson(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = required_str(params, "lessonId")?;
    let title = required_str(params, "title")?;
    let lesson_date = required_str(params, "lessonDate")?;
    let description = optional_str(params, "description");

    let changed = conn
        .execute(
            "UPDATE lessons SET title = ?, description = ?, lesson_date = ? WHERE id = ?",
            (&title, &description, &lesson_date, &lesson_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("lesson not found"));
    }
    Ok(json!({
        "id": lesson_id,
        "title": title,
        "description": description,
        "lessonDate": lesson_date,
    }))
}

fn delete_lesson(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = required_str(params, "lessonId")?;
    if !lesson_exists(conn, &lesson_id)? {
        return Err(HandlerErr::not_found("lesson not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (sql, table) in [
        (
            "DELETE FROM lesson_resources WHERE lesson_id = ?",
            "lesson_resources",
        ),
        (
            "DELETE FROM lesson_assignments WHERE lesson_id = ?",
            "lesson_assignments",
        ),
        ("DELETE FROM lessons WHERE id = ?", "lessons"),
    ] {
        if let Err(e) = tx.execute(sql, [&lesson_id]) {
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

fn assign_user(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = required_str(params, "lessonId")?;
    let user_id = required_str(params, "userId")?;
    if !lesson_exists(conn, &lesson_id)? {
        return Err(HandlerErr::not_found("lesson not found"));
    }
    if !user_exists(conn, &user_id)? {
        return Err(HandlerErr::not_found("user not found"));
    }

    conn.execute(
        "INSERT INTO lesson_assignments(id, lesson_id, user_id) VALUES(?, ?, ?)",
        (Uuid::new_v4().to_string(), &lesson_id, &user_id),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            HandlerErr::conflict("user is already assigned to this lesson")
        } else {
            HandlerErr::db("db_insert_failed", e)
        }
    })?;
    Ok(json!({ "ok": true }))
}

fn unassign_user(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = required_str(params, "lessonId")?;
    let user_id = required_str(params, "userId")?;
    let removed = conn
        .execute(
            "DELETE FROM lesson_assignments WHERE lesson_id = ? AND user_id = ?",
            (&lesson_id, &user_id),
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("assignment not found"));
    }
    Ok(json!({ "ok": true }))
}

fn add_resource(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = required_str(params, "lessonId")?;
    let file_name = required_str(params, "fileName")?;
    let file_path = required_str(params, "filePath")?;
    if !lesson_exists(conn, &lesson_id)? {
        return Err(HandlerErr::not_found("lesson not found"));
    }

    let resource_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lesson_resources(id, lesson_id, file_name, file_path)
         VALUES(?, ?, ?, ?)",
        (&resource_id, &lesson_id, &file_name, &file_path),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    Ok(json!({
        "id": resource_id,
        "lessonId": lesson_id,
        "fileName": file_name,
        "filePath": file_path,
    }))
}

fn remove_resource(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let resource_id = required_str(params, "resourceId")?;
    let removed = conn
        .execute("DELETE FROM lesson_resources WHERE id = ?", [&resource_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("resource not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "lessons.list"
            | "lessons.create"
            | "lessons.get"
            | "lessons.update"
            | "lessons.delete"
            | "lessons.assign"
            | "lessons.unassign"
            | "lessons.resources.add"
            | "lessons.resources.remove"
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
        "lessons.list" => list_lessons(conn),
        "lessons.create" => create_lesson(conn, &caller.id, &req.params),
        "lessons.get" => get_lesson(conn, &req.params),
        "lessons.update" => update_lesson(conn, &req.params),
        "lessons.delete" => delete_lesson(conn, &req.params),
        "lessons.assign" => assign_user(conn, &req.params),
        "lessons.unassign" => unassign_user(conn, &req.params),
        "lessons.resources.add" => add_resource(conn, &req.params),
        _ => remove_resource(conn, &req.params),
    };
    Some(match result {
        Ok(body) => ok(&req.id, body),
        Err(e) => e.response(&req.id),
    })
}
