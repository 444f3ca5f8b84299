use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "disiplin.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            pass_salt TEXT NOT NULL,
            pass_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            class_id TEXT,
            point_total INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS violation_types(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            points INTEGER NOT NULL
        )",
        [],
    )?;

    // Events snapshot the catalog name and point value at record time so
    // catalog edits never rewrite history. No FK on violation_type_id:
    // catalog entries may be deleted while their history remains.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS violation_events(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            violation_type_id TEXT NOT NULL,
            type_name TEXT NOT NULL,
            points INTEGER NOT NULL,
            date TEXT NOT NULL,
            note TEXT,
            evidence_ref TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_violation_events_student ON violation_events(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_violation_events_date ON violation_events(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS letters(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            tier TEXT NOT NULL,
            letter_no TEXT NOT NULL,
            date TEXT NOT NULL,
            file_ref TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_letters_student ON letters(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_letters_date ON letters(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS letter_sequences(
            tier TEXT NOT NULL,
            year INTEGER NOT NULL,
            next_seq INTEGER NOT NULL,
            UNIQUE(tier, year)
        )",
        [],
    )?;

    // Early workspaces stored events without snapshots. Add and backfill
    // from the live catalog as a best effort.
    ensure_event_snapshot_columns(&conn)?;

    Ok(conn)
}

fn ensure_event_snapshot_columns(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "violation_events", "type_name")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE violation_events ADD COLUMN type_name TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    conn.execute(
        "ALTER TABLE violation_events ADD COLUMN points INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute(
        "UPDATE violation_events SET
            type_name = COALESCE((SELECT vt.name FROM violation_types vt
                                  WHERE vt.id = violation_events.violation_type_id), ''),
            points = COALESCE((SELECT vt.points FROM violation_types vt
                               WHERE vt.id = violation_events.violation_type_id), 0)",
        [],
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
