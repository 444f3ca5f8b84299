use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, db_err, get_required_str, require_caller, require_manage, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

const CATEGORIES: [&str; 3] = ["light", "moderate", "severe"];

fn parse_category(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let category = get_required_str(params, "category")?;
    if !CATEGORIES.contains(&category.as_str()) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "category must be one of: light, moderate, severe",
            json!({ "category": category }),
        ));
    }
    Ok(category)
}

fn parse_points(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let points = params
        .get("points")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing points"))?;
    if points <= 0 {
        return Err(HandlerErr::new("bad_params", "points must be positive"));
    }
    Ok(points)
}

fn catalog_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, category, points
             FROM violation_types
             ORDER BY category, name",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "category": r.get::<_, String>(2)?,
                "points": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "violationTypes": rows }))
}

fn catalog_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let name = get_required_str(&req.params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let category = parse_category(&req.params)?;
    let points = parse_points(&req.params)?;

    let type_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO violation_types(id, name, category, points) VALUES(?, ?, ?, ?)",
        (&type_id, &name, &category, points),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "violation_types" }),
        )
    })?;

    Ok(json!({ "violationTypeId": type_id, "name": name }))
}

fn catalog_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let type_id = get_required_str(&req.params, "violationTypeId")?;
    let name = get_required_str(&req.params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let category = parse_category(&req.params)?;
    let points = parse_points(&req.params)?;

    // Recorded events hold their own snapshot, so an explicit catalog edit
    // affects future records only.
    let changed = conn
        .execute(
            "UPDATE violation_types SET name = ?, category = ?, points = ? WHERE id = ?",
            (&name, &category, points, &type_id),
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "violation type not found"));
    }

    Ok(json!({ "violationTypeId": type_id }))
}

fn catalog_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let type_id = get_required_str(&req.params, "violationTypeId")?;
    let changed = conn
        .execute("DELETE FROM violation_types WHERE id = ?", [&type_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "violation_types" }),
            )
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "violation type not found"));
    }

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "catalog.list" => catalog_list(state, req),
        "catalog.create" => catalog_create(state, req),
        "catalog.update" => catalog_update(state, req),
        "catalog.delete" => catalog_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
