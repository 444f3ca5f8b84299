use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, db_err, get_optional_str, get_required_str, require_caller, require_input,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::letter::{self, LetterInput, RecentViolation};
use crate::store;
use chrono::{Datelike, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::json;
use uuid::Uuid;

const RECENT_VIOLATIONS_IN_LETTER: i64 = 10;

fn letters_eligible(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    let search = get_optional_str(&req.params, "search");

    let (sql, binds): (&str, Vec<&dyn ToSql>) = if let Some(ref term) = search {
        (
            "SELECT s.id, s.external_id, s.name, c.name, s.point_total
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id
             WHERE s.point_total > 0
               AND (s.name LIKE '%' || ?1 || '%' OR s.external_id LIKE '%' || ?1 || '%')
             ORDER BY s.point_total DESC, s.name",
            vec![term as &dyn ToSql],
        )
    } else {
        (
            "SELECT s.id, s.external_id, s.name, c.name, s.point_total
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id
             WHERE s.point_total > 0
             ORDER BY s.point_total DESC, s.name",
            vec![],
        )
    };

    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let class_name: Option<String> = r.get(3)?;
            let total: i64 = r.get(4)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "externalId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "className": class_name.unwrap_or_else(|| "-".to_string()),
                "pointTotal": total,
                "recommendedTier": letter::classify(total).map(|t| t.code()),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "students": rows }))
}

fn recent_violations(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<RecentViolation>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT type_name, points
             FROM violation_events
             WHERE student_id = ?
             ORDER BY date DESC, created_at DESC
             LIMIT ?",
        )
        .map_err(db_err)?;
    stmt.query_map(
        (student_id, RECENT_VIOLATIONS_IN_LETTER),
        |r| {
            Ok(RecentViolation {
                name: r.get(0)?,
                points: r.get(1)?,
            })
        },
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn letters_generate(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_input(state)?;
    let conn = db_conn(state)?;
    let workspace = state
        .workspace
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;

    let student_id = get_required_str(&req.params, "studentId")?;

    let student: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT external_id, name, point_total FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let (external_id, student_name, point_total) =
        student.ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;

    let tier = letter::classify(point_total).ok_or_else(|| {
        HandlerErr::with_details(
            "not_eligible",
            "student has no violation points",
            json!({ "pointTotal": point_total }),
        )
    })?;

    let violations = recent_violations(conn, &student_id)?;

    let now = Utc::now();
    let date = now.format("%Y-%m-%d").to_string();
    let year = now.year();

    // Sequence bump, artifact write and letter insert live in one
    // transaction so a failure leaves neither a burned number nor a
    // dangling row. An already-written artifact is not removed if the
    // commit itself fails.
    let tx = conn.unchecked_transaction().map_err(db_err)?;

    let seq: i64 = tx
        .query_row(
            "SELECT next_seq FROM letter_sequences WHERE tier = ? AND year = ?",
            (tier.code(), year),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?
        .unwrap_or(1);
    tx.execute(
        "INSERT INTO letter_sequences(tier, year, next_seq) VALUES(?, ?, ?)
         ON CONFLICT(tier, year) DO UPDATE SET next_seq = excluded.next_seq",
        (tier.code(), year, seq + 1),
    )
    .map_err(db_err)?;

    let letter_no = letter::format_letter_no(tier, year, seq);
    let input = LetterInput {
        student_name: &student_name,
        external_id: &external_id,
        tier,
        point_total,
        letter_no: &letter_no,
        date: &date,
        violations: &violations,
    };
    let pdf_bytes = letter::render_letter_pdf(&input);

    let file_ref = store::store_letter(
        workspace,
        tier.code(),
        &external_id,
        now.timestamp_millis(),
        &pdf_bytes,
    )
    .map_err(|e| HandlerErr::new("store_write_failed", format!("{e:#}")))?;

    let letter_id = Uuid::new_v4().to_string();
    let created_at = now.to_rfc3339();
    tx.execute(
        "INSERT INTO letters(id, student_id, tier, letter_no, date, file_ref, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &letter_id,
            &student_id,
            tier.code(),
            &letter_no,
            &date,
            &file_ref,
            &caller.user_id,
            &created_at,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "letters" }),
        )
    })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log::info!(
        "generated {} letter {} for student {}",
        tier.code(),
        letter_no,
        student_id
    );

    Ok(json!({
        "letterId": letter_id,
        "letterNo": letter_no,
        "tier": tier.code(),
        "date": date,
        "fileRef": file_ref,
        "studentName": student_name,
        "pointTotal": point_total,
    }))
}

fn letters_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    let mut stmt = conn
        .prepare(
            "SELECT l.id, l.tier, l.letter_no, l.date, l.file_ref, l.created_at,
                    s.name, s.external_id,
                    p.name
             FROM letters l
             LEFT JOIN students s ON s.id = l.student_id
             LEFT JOIN profiles p ON p.id = l.created_by
             ORDER BY l.created_at DESC
             LIMIT 20",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            let student_name: Option<String> = r.get(6)?;
            let external_id: Option<String> = r.get(7)?;
            let creator_name: Option<String> = r.get(8)?;
            Ok(json!({
                "letterId": r.get::<_, String>(0)?,
                "tier": r.get::<_, String>(1)?,
                "letterNo": r.get::<_, String>(2)?,
                "date": r.get::<_, String>(3)?,
                "fileRef": r.get::<_, String>(4)?,
                "createdAt": r.get::<_, String>(5)?,
                "studentName": student_name.unwrap_or_else(|| "-".to_string()),
                "externalId": external_id.unwrap_or_else(|| "-".to_string()),
                "createdByName": creator_name.unwrap_or_else(|| "-".to_string()),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "letters": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "letters.eligible" => letters_eligible(state, req),
        "letters.generate" => letters_generate(state, req),
        "letters.list" => letters_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
