use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "tutord.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Sheets are created loosely typed: every column has a default so a
/// partially filled row still loads.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            school TEXT NOT NULL DEFAULT '',
            generation TEXT NOT NULL DEFAULT '',
            enrollment_date TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            school TEXT NOT NULL DEFAULT '',
            year TEXT NOT NULL DEFAULT '',
            semester TEXT NOT NULL DEFAULT '',
            generation TEXT NOT NULL DEFAULT '',
            schedule TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lectures(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL DEFAULT '',
            topic TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lectures_class ON lectures(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL DEFAULT '',
            class_id TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active'
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL DEFAULT '',
            class_id TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance(class_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    // Older workspaces kept exam date/class/status only on exam_problems rows.
    ensure_exams_metadata_columns(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS problems(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_problems(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL DEFAULT '',
            problem_id TEXT NOT NULL DEFAULT '',
            max_score REAL NOT NULL DEFAULT 0,
            problem_number INTEGER NOT NULL DEFAULT 0,
            date TEXT NOT NULL DEFAULT '',
            class_id TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_problems_exam ON exam_problems(exam_id)",
        [],
    )?;

    // No UNIQUE(exam_id, student_id, problem_id): the score reconciler owns that key.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL DEFAULT '',
            student_id TEXT NOT NULL DEFAULT '',
            problem_id TEXT NOT NULL DEFAULT '',
            score REAL NOT NULL DEFAULT 0,
            comment TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT '',
            last_updated TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_exam ON scores(exam_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_exams_metadata_columns(conn: &Connection) -> anyhow::Result<()> {
    for column in ["class_id", "date", "status"] {
        if !table_has_column(conn, "exams", column)? {
            conn.execute(
                &format!(
                    "ALTER TABLE exams ADD COLUMN {} TEXT NOT NULL DEFAULT ''",
                    column
                ),
                [],
            )?;
        }
    }
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

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
