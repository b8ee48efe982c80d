use rusqlite::Connection;
use serde_json::json;

use crate::duty::{self, DutyStatus};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::gate::{authorize, Capability};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};

/// Merged calendar feed: every lesson and every duty day, shaped for the
/// shell's calendar widget.
fn events(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT title, lesson_date FROM lessons")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let mut events = stmt
        .query_map([], |r| {
            let title: String = r.get(0)?;
            let date: String = r.get(1)?;
            Ok(json!({
                "title": title,
                "start": date,
                "end": date,
                "type": "lesson",
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut stmt = conn
        .prepare(
            "SELECT d.duty_date, s.full_name, j.full_name
             FROM duty_rota d
             JOIN users s ON s.id = d.actual_senior_id
             JOIN users j ON j.id = d.actual_junior_id",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let duty_events = stmt
        .query_map([], |r| {
            let date: String = r.get(0)?;
            let senior: String = r.get(1)?;
            let junior: String = r.get(2)?;
            Ok(json!({
                "title": format!("DS: {}\nDJ: {}", senior, junior),
                "start": date,
                "end": date,
                "type": "duty",
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    events.extend(duty_events);
    Ok(json!({ "events": events }))
}

fn my_duties(conn: &Connection, user_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT d.duty_date,
                    d.original_senior_id,
                    d.actual_senior_id, d.actual_junior_id,
                    d.senior_status, d.junior_status,
                    s.full_name, j.full_name
             FROM duty_rota d
             JOIN users s ON s.id = d.actual_senior_id
             JOIN users j ON j.id = d.actual_junior_id
             WHERE d.original_senior_id = ?1 OR d.original_junior_id = ?1
                OR d.actual_senior_id = ?1 OR d.actual_junior_id = ?1
             ORDER BY d.duty_date ASC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([user_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut duties = Vec::with_capacity(rows.len());
    for (date, osid, asid, ajid, ss, js, s_name, j_name) in rows {
        // The actual position wins: a member substituted into the other
        // role sees the role they will stand, not the one planned. A row
        // matched only through original junior falls to the last arm.
        let user_duty = if asid == user_id {
            "Duty Senior"
        } else if ajid == user_id {
            "Duty Junior"
        } else if osid == user_id {
            "Duty Senior"
        } else {
            "Duty Junior"
        };
        let senior_status = DutyStatus::parse(&ss)
            .ok_or_else(|| HandlerErr::new("db_query_failed", format!("bad status: {}", ss)))?;
        let junior_status = DutyStatus::parse(&js)
            .ok_or_else(|| HandlerErr::new("db_query_failed", format!("bad status: {}", js)))?;
        duties.push(json!({
            "dutyDate": date,
            "userDuty": user_duty,
            "actualSeniorName": s_name,
            "actualJuniorName": j_name,
            "seniorStatus": senior_status.as_str(),
            "juniorStatus": junior_status.as_str(),
            "displayColor": duty::color_for_duty(senior_status, junior_status),
        }));
    }
    Ok(json!({ "duties": duties }))
}

fn my_lessons(conn: &Connection, user_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT l.id, l.title, l.description, l.lesson_date
             FROM lesson_assignments a
             JOIN lessons l ON l.id = a.lesson_id
             WHERE a.user_id = ?
             ORDER BY l.lesson_date ASC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let lessons = stmt
        .query_map([user_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut out = Vec::with_capacity(lessons.len());
    for (lesson_id, title, description, lesson_date) in lessons {
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

        let mut stmt = conn
            .prepare(
                "SELECT u.full_name
                 FROM lesson_assignments a
                 JOIN users u ON u.id = a.user_id
                 WHERE a.lesson_id = ?
                 ORDER BY u.full_name",
            )
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        let attendees = stmt
            .query_map([&lesson_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;

        out.push(json!({
            "id": lesson_id,
            "title": title,
            "description": description,
            "lessonDate": lesson_date,
            "resources": resources,
            "attendees": attendees,
        }));
    }
    Ok(json!({ "lessons": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "rota.events" | "rota.myDuties" | "rota.myLessons"
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
        "rota.events" => events(conn),
        "rota.myDuties" => my_duties(conn, &caller.id),
        _ => my_lessons(conn, &caller.id),
    };
    Some(match result {
        Ok(body) => ok(&req.id, body),
        Err(e) => e.response(&req.id),
    })
}
