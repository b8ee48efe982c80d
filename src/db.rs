use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

use crate::auth;

pub const DB_FILE_NAME: &str = "portal.sqlite3";

/// Username and password seeded into an empty workspace. The shell prompts
/// for a password change on first sign-in.
pub const SEED_ADMIN_USERNAME: &str = "admin";
pub const SEED_ADMIN_PASSWORD: &str = "ChangeMe!Now1";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('USER','ADMIN')),
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_full_name ON users(full_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            lesson_date TEXT NOT NULL,
            created_by_id TEXT,
            FOREIGN KEY(created_by_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_date ON lessons(lesson_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_assignments(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            FOREIGN KEY(user_id) REFERENCES users(id),
            UNIQUE(lesson_id, user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_assignments_lesson ON lesson_assignments(lesson_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_assignments_user ON lesson_assignments(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_resources(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_resources_lesson ON lesson_resources(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS duty_rota(
            id TEXT PRIMARY KEY,
            duty_date TEXT NOT NULL UNIQUE,
            original_senior_id TEXT NOT NULL,
            original_junior_id TEXT NOT NULL,
            actual_senior_id TEXT NOT NULL,
            actual_junior_id TEXT NOT NULL,
            senior_status TEXT NOT NULL DEFAULT 'UNCONFIRMED'
                CHECK(senior_status IN ('UNCONFIRMED','ATTENDED','ABSENT')),
            junior_status TEXT NOT NULL DEFAULT 'UNCONFIRMED'
                CHECK(junior_status IN ('UNCONFIRMED','ATTENDED','ABSENT')),
            FOREIGN KEY(original_senior_id) REFERENCES users(id),
            FOREIGN KEY(original_junior_id) REFERENCES users(id),
            FOREIGN KEY(actual_senior_id) REFERENCES users(id),
            FOREIGN KEY(actual_junior_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_duty_rota_actual_senior ON duty_rota(actual_senior_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_duty_rota_actual_junior ON duty_rota(actual_junior_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS absences(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            reason TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absences_user ON absences(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS uniform_items(
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            size TEXT NOT NULL,
            condition TEXT NOT NULL,
            added_by_id TEXT,
            added_at TEXT NOT NULL,
            FOREIGN KEY(added_by_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uniform_items_added_by ON uniform_items(added_by_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cadets(
            id TEXT PRIMARY KEY,
            serial TEXT,
            sqn TEXT NOT NULL,
            rank TEXT NOT NULL,
            full_name TEXT NOT NULL
        )",
        [],
    )?;
    ensure_cadets_serial(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cadets_full_name ON cadets(full_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_cohorts(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            instructor_name TEXT NOT NULL,
            instructor_sqn TEXT NOT NULL,
            assessor_name TEXT NOT NULL,
            assessor_sqn TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS radio_assessments(
            id TEXT PRIMARY KEY,
            cohort_id TEXT NOT NULL,
            cadet_id TEXT NOT NULL,
            first_class_logbook_completed TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(first_class_logbook_completed IN ('PASS','FAIL','PENDING')),
            basic_cyber_security_video_watched TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(basic_cyber_security_video_watched IN ('PASS','FAIL','PENDING')),
            correct_use_of_both_full_callsigns TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(correct_use_of_both_full_callsigns IN ('PASS','FAIL','PENDING')),
            authenticate_requested TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(authenticate_requested IN ('PASS','FAIL','PENDING')),
            authenticate_answered_correctly TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(authenticate_answered_correctly IN ('PASS','FAIL','PENDING')),
            radio_check_requested TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(radio_check_requested IN ('PASS','FAIL','PENDING')),
            radio_check_answered_correctly TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(radio_check_answered_correctly IN ('PASS','FAIL','PENDING')),
            tactical_message_fully_answered TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(tactical_message_fully_answered IN ('PASS','FAIL','PENDING')),
            i_say_again_used_correctly TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(i_say_again_used_correctly IN ('PASS','FAIL','PENDING')),
            say_again_used TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(say_again_used IN ('PASS','FAIL','PENDING')),
            proword_knowledge_completed_ok TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(proword_knowledge_completed_ok IN ('PASS','FAIL','PENDING')),
            security_knowledge_completed_ok TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(security_knowledge_completed_ok IN ('PASS','FAIL','PENDING')),
            general_operating_and_confidence TEXT NOT NULL DEFAULT 'PENDING'
                CHECK(general_operating_and_confidence IN ('PASS','FAIL','PENDING')),
            pass_fail INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(cohort_id) REFERENCES assessment_cohorts(id),
            FOREIGN KEY(cadet_id) REFERENCES cadets(id),
            UNIQUE(cohort_id, cadet_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_radio_assessments_cohort ON radio_assessments(cohort_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_radio_assessments_cadet ON radio_assessments(cadet_id)",
        [],
    )?;

    seed_admin_if_empty(&conn)?;

    Ok(conn)
}

/// Workspaces created before the cadet register gained BRO serials lack the
/// serial column. Add it; existing rows keep NULL.
fn ensure_cadets_serial(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "cadets", "serial")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE cadets ADD COLUMN serial TEXT", [])?;
    Ok(())
}

/// A fresh workspace has nobody who could sign in, so seed one well-known
/// admin account. Never touches a workspace that already has users.
fn seed_admin_if_empty(conn: &Connection) -> anyhow::Result<()> {
    let user_count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if user_count > 0 {
        return Ok(());
    }
    let salt = auth::new_salt();
    let hash = auth::hash_password(SEED_ADMIN_PASSWORD, &salt);
    conn.execute(
        "INSERT INTO users(id, username, full_name, password_hash, password_salt, role, created_at)
         VALUES(?, ?, ?, ?, ?, 'ADMIN', ?)",
        (
            Uuid::new_v4().to_string(),
            SEED_ADMIN_USERNAME,
            "Portal Administrator",
            &hash,
            &salt,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
