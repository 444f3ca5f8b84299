use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, db_err, get_optional_str, require_caller, require_input, require_manage, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::{NaiveDate, Utc};
use rusqlite::{params_from_iter, OptionalExtension, ToSql};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

/// Field-level validation for the entry form. Everything is checked before
/// any write of any kind happens; a failure here means zero side effects.
fn validate_record_params(
    params: &serde_json::Value,
) -> Result<(String, String, String), HandlerErr> {
    let mut fields = serde_json::Map::new();

    let student_id = params.get("studentId").and_then(|v| v.as_str());
    if student_id.map_or(true, |s| s.is_empty()) {
        fields.insert("studentId".into(), json!("a student must be selected"));
    }
    let type_id = params.get("violationTypeId").and_then(|v| v.as_str());
    if type_id.map_or(true, |s| s.is_empty()) {
        fields.insert(
            "violationTypeId".into(),
            json!("a violation type must be selected"),
        );
    }
    let date = params.get("date").and_then(|v| v.as_str());
    match date {
        None | Some("") => {
            fields.insert("date".into(), json!("a date is required"));
        }
        Some(d) => {
            if NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
                fields.insert("date".into(), json!("date must be YYYY-MM-DD"));
            }
        }
    }

    if !fields.is_empty() {
        return Err(HandlerErr::with_details(
            "validation_failed",
            "required fields are missing or invalid",
            json!({ "fields": fields }),
        ));
    }

    Ok((
        student_id.unwrap_or_default().to_string(),
        type_id.unwrap_or_default().to_string(),
        date.unwrap_or_default().to_string(),
    ))
}

fn violations_record(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_input(state)?;
    let conn = db_conn(state)?;
    let workspace = state
        .workspace
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;

    let (student_id, type_id, date) = validate_record_params(&req.params)?;
    let note = get_optional_str(&req.params, "note");
    let evidence_path = get_optional_str(&req.params, "evidencePath").map(PathBuf::from);

    // Evidence is validated before anything touches the database or store.
    let evidence_kind = match evidence_path.as_deref() {
        Some(p) => Some(store::validate_evidence(p).map_err(|e| {
            let code = match e {
                store::EvidenceError::TooLarge { .. } => "evidence_too_large",
                store::EvidenceError::UnsupportedType => "evidence_bad_type",
                store::EvidenceError::Io(_) => "evidence_unreadable",
            };
            HandlerErr::with_details(code, e.to_string(), json!({ "fields": { "evidence": e.to_string() } }))
        })?),
        None => None,
    };

    let student: Option<(String, i64)> = conn
        .query_row(
            "SELECT external_id, point_total FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let (_external_id, prior_total) =
        student.ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;

    let vtype: Option<(String, i64)> = conn
        .query_row(
            "SELECT name, points FROM violation_types WHERE id = ?",
            [&type_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let (type_name, points) =
        vtype.ok_or_else(|| HandlerErr::new("not_found", "violation type not found"))?;

    // Store the evidence first; a failed copy aborts the whole operation
    // with no event recorded.
    let now = Utc::now();
    let evidence_ref = match (evidence_path.as_deref(), evidence_kind) {
        (Some(src), Some(kind)) => Some(
            store::store_evidence(workspace, src, kind, &student_id, now.timestamp_millis())
                .map_err(|e| HandlerErr::new("store_write_failed", format!("{e:#}")))?,
        ),
        _ => None,
    };

    // Event insert and total update commit together. The relative SET keeps
    // concurrent submissions from losing an increment.
    let event_id = Uuid::new_v4().to_string();
    let created_at = now.to_rfc3339();
    let tx = conn.unchecked_transaction().map_err(db_err)?;
    tx.execute(
        "INSERT INTO violation_events(
            id, student_id, violation_type_id, type_name, points,
            date, note, evidence_ref, created_by, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &event_id,
            &student_id,
            &type_id,
            &type_name,
            points,
            &date,
            &note,
            &evidence_ref,
            &caller.user_id,
            &created_at,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "violation_events" }),
        )
    })?;
    tx.execute(
        "UPDATE students SET point_total = point_total + ? WHERE id = ?",
        (points, &student_id),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "students" }),
        )
    })?;
    // Read the total back inside the transaction; the prior value fetched
    // above may already be stale under concurrent submissions.
    let new_total: i64 = tx
        .query_row(
            "SELECT point_total FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log::info!(
        "recorded violation {} (+{} points) for student {}",
        type_name,
        points,
        student_id
    );

    Ok(json!({
        "eventId": event_id,
        "points": points,
        "priorTotal": prior_total,
        "newTotal": new_total,
        "evidenceRef": evidence_ref,
    }))
}

fn history_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    let search = get_optional_str(&req.params, "search");
    let from = get_optional_str(&req.params, "from");
    let to = get_optional_str(&req.params, "to");

    let mut sql = String::from(
        "SELECT e.id, e.date, e.type_name, e.points, e.note, e.evidence_ref,
                e.created_at,
                s.name, s.external_id,
                c.name,
                vt.category,
                p.name
         FROM violation_events e
         LEFT JOIN students s ON s.id = e.student_id
         LEFT JOIN classes c ON c.id = s.class_id
         LEFT JOIN violation_types vt ON vt.id = e.violation_type_id
         LEFT JOIN profiles p ON p.id = e.created_by
         WHERE 1 = 1",
    );
    let mut binds: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref term) = search {
        sql.push_str(
            " AND (s.name LIKE '%' || ? || '%'
               OR s.external_id LIKE '%' || ? || '%'
               OR e.type_name LIKE '%' || ? || '%')",
        );
        binds.push(term as &dyn ToSql);
        binds.push(term as &dyn ToSql);
        binds.push(term as &dyn ToSql);
    }
    if let Some(ref f) = from {
        sql.push_str(" AND e.date >= ?");
        binds.push(f as &dyn ToSql);
    }
    if let Some(ref t) = to {
        sql.push_str(" AND e.date <= ?");
        binds.push(t as &dyn ToSql);
    }
    sql.push_str(" ORDER BY e.created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let student_name: Option<String> = r.get(7)?;
            let external_id: Option<String> = r.get(8)?;
            let class_name: Option<String> = r.get(9)?;
            let category: Option<String> = r.get(10)?;
            let creator_name: Option<String> = r.get(11)?;
            Ok(json!({
                "eventId": r.get::<_, String>(0)?,
                "date": r.get::<_, String>(1)?,
                "violationName": r.get::<_, String>(2)?,
                "points": r.get::<_, i64>(3)?,
                "note": r.get::<_, Option<String>>(4)?,
                "evidenceRef": r.get::<_, Option<String>>(5)?,
                "createdAt": r.get::<_, String>(6)?,
                "studentName": student_name.unwrap_or_else(|| "-".to_string()),
                "externalId": external_id.unwrap_or_else(|| "-".to_string()),
                "className": class_name.unwrap_or_else(|| "-".to_string()),
                "category": category.unwrap_or_else(|| "-".to_string()),
                "createdByName": creator_name.unwrap_or_else(|| "-".to_string()),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "events": rows }))
}

/// Re-derive every stored point total from event history. Recovery path for
/// totals that drifted before the transactional write pair existed.
fn recount_totals(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_manage(state)?;
    let conn = db_conn(state)?;

    let updated = conn
        .execute(
            "UPDATE students SET point_total = COALESCE(
                (SELECT SUM(e.points) FROM violation_events e
                 WHERE e.student_id = students.id), 0)",
            [],
        )
        .map_err(db_err)?;

    Ok(json!({ "studentsUpdated": updated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "violations.record" => violations_record(state, req),
        "violations.recountTotals" => recount_totals(state, req),
        "history.list" => history_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
