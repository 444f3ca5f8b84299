use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, db_err, get_optional_str, get_required_str, require_caller, require_manage,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, OptionalExtension, ToSql};
use serde_json::json;
use uuid::Uuid;

fn students_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    let search = get_optional_str(&req.params, "search");

    let (sql, binds): (&str, Vec<&dyn ToSql>) = if let Some(ref term) = search {
        (
            "SELECT s.id, s.external_id, s.name, s.class_id, c.name, s.point_total
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id
             WHERE s.name LIKE '%' || ?1 || '%' OR s.external_id LIKE '%' || ?1 || '%'
             ORDER BY s.name",
            vec![term as &dyn ToSql],
        )
    } else {
        (
            "SELECT s.id, s.external_id, s.name, s.class_id, c.name, s.point_total
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id
             ORDER BY s.name",
            vec![],
        )
    };

    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let class_name: Option<String> = r.get(4)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "externalId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "classId": r.get::<_, Option<String>>(3)?,
                // Unresolvable class renders as a placeholder, not a failure.
                "className": class_name.unwrap_or_else(|| "-".to_string()),
                "pointTotal": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "students": rows }))
}

fn students_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let external_id = get_required_str(&req.params, "externalId")?.trim().to_string();
    let name = get_required_str(&req.params, "name")?.trim().to_string();
    let class_id = get_required_str(&req.params, "classId")?;
    if external_id.is_empty() || name.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            "externalId and name must not be empty",
        ));
    }

    let class_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if class_ok.is_none() {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, external_id, name, class_id, point_total)
         VALUES(?, ?, ?, ?, 0)",
        (&student_id, &external_id, &name, &class_id),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "students" }),
        )
    })?;

    Ok(json!({ "studentId": student_id, "externalId": external_id }))
}

fn students_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let student_id = get_required_str(&req.params, "studentId")?;
    let external_id = get_required_str(&req.params, "externalId")?.trim().to_string();
    let name = get_required_str(&req.params, "name")?.trim().to_string();
    let class_id = get_required_str(&req.params, "classId")?;
    if external_id.is_empty() || name.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            "externalId and name must not be empty",
        ));
    }

    let changed = conn
        .execute(
            "UPDATE students SET external_id = ?, name = ?, class_id = ? WHERE id = ?",
            (&external_id, &name, &class_id, &student_id),
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    Ok(json!({ "studentId": student_id }))
}

fn students_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let student_id = get_required_str(&req.params, "studentId")?;

    // History and letters reference the student; remove them first within
    // one transaction so a partial delete cannot strand rows.
    let tx = conn.unchecked_transaction().map_err(db_err)?;
    tx.execute(
        "DELETE FROM violation_events WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "violation_events" }),
        )
    })?;
    tx.execute("DELETE FROM letters WHERE student_id = ?", [&student_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "letters" }),
            )
        })?;
    let changed = tx
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "students" }),
            )
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.create" => students_create(state, req),
        "students.update" => students_update(state, req),
        "students.delete" => students_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
