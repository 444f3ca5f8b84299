use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, db_err, get_required_str, require_caller, require_manage, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn classes_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    // Correlated subquery for the enrolment count so the roster screen can
    // show it without a second round trip.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
             FROM classes c
             ORDER BY c.name",
        )
        .map_err(db_err)?;

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "studentCount": row.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "classes": rows }))
}

fn classes_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let name = get_required_str(&req.params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, &name),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "classes" }))
    })?;

    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let class_id = get_required_str(&req.params, "classId")?;
    let name = get_required_str(&req.params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }

    let changed = conn
        .execute("UPDATE classes SET name = ? WHERE id = ?", (&name, &class_id))
        .map_err(db_err)?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let class_id = get_required_str(&req.params, "classId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let enrolled: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    if enrolled > 0 {
        return Err(HandlerErr::with_details(
            "class_in_use",
            "class still has enrolled students",
            json!({ "studentCount": enrolled }),
        ));
    }

    conn.execute("DELETE FROM classes WHERE id = ?", [&class_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "classes" }),
            )
        })?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => classes_list(state, req),
        "classes.create" => classes_create(state, req),
        "classes.update" => classes_update(state, req),
        "classes.delete" => classes_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
