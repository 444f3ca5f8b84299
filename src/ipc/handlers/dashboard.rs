use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, db_err, require_caller, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::json;

/// A failed aggregate logs and reports zero; one broken region must not
/// take down the whole summary screen.
fn count_or_zero(conn: &Connection, sql: &str, binds: &[&str]) -> i64 {
    let res: rusqlite::Result<i64> =
        conn.query_row(sql, rusqlite::params_from_iter(binds.iter()), |r| r.get(0));
    match res {
        Ok(v) => v,
        Err(e) => {
            log::warn!("dashboard aggregate failed ({}): {}", sql, e);
            0
        }
    }
}

fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// The first day of the month `offset` months before the current one.
fn shifted_month(today: NaiveDate, offset: u32) -> Option<NaiveDate> {
    let mut year = today.year();
    let mut month = today.month() as i32 - offset as i32;
    while month < 1 {
        month += 12;
        year -= 1;
    }
    month_start(year, month as u32)
}

fn dashboard_summary(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    let today = Utc::now().date_naive();
    let start_of_month = month_start(today.year(), today.month())
        .unwrap_or(today)
        .format("%Y-%m-%d")
        .to_string();

    let total_students = count_or_zero(conn, "SELECT COUNT(*) FROM students", &[]);
    let total_events = count_or_zero(conn, "SELECT COUNT(*) FROM violation_events", &[]);
    let events_this_month = count_or_zero(
        conn,
        "SELECT COUNT(*) FROM violation_events WHERE date >= ?",
        &[&start_of_month],
    );
    let letters_this_month = count_or_zero(
        conn,
        "SELECT COUNT(*) FROM letters WHERE date >= ?",
        &[&start_of_month],
    );

    Ok(json!({
        "totalStudents": total_students,
        "totalViolations": total_events,
        "violationsThisMonth": events_this_month,
        "lettersThisMonth": letters_this_month,
    }))
}

fn dashboard_monthly(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    let today = Utc::now().date_naive();
    let mut months = Vec::new();
    for offset in (0..6).rev() {
        let Some(start) = shifted_month(today, offset) else {
            continue;
        };
        let Some(next) = shifted_month(today, offset).and_then(|d| {
            if d.month() == 12 {
                month_start(d.year() + 1, 1)
            } else {
                month_start(d.year(), d.month() + 1)
            }
        }) else {
            continue;
        };

        let start_s = start.format("%Y-%m-%d").to_string();
        let next_s = next.format("%Y-%m-%d").to_string();
        let count = count_or_zero(
            conn,
            "SELECT COUNT(*) FROM violation_events WHERE date >= ? AND date < ?",
            &[&start_s, &next_s],
        );
        months.push(json!({
            "month": start.format("%Y-%m").to_string(),
            "violations": count,
        }));
    }

    Ok(json!({ "months": months }))
}

fn dashboard_categories(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    // Events whose catalog entry was deleted keep their snapshot but lose
    // the category; they are counted under "other".
    let mut light = 0i64;
    let mut moderate = 0i64;
    let mut severe = 0i64;
    let mut other = 0i64;

    let mut stmt = conn
        .prepare(
            "SELECT COALESCE(vt.category, 'other'), COUNT(*)
             FROM violation_events e
             LEFT JOIN violation_types vt ON vt.id = e.violation_type_id
             GROUP BY 1",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    for (category, count) in rows {
        match category.as_str() {
            "light" => light = count,
            "moderate" => moderate = count,
            "severe" => severe = count,
            _ => other += count,
        }
    }

    Ok(json!({
        "light": light,
        "moderate": moderate,
        "severe": severe,
        "other": other,
    }))
}

fn dashboard_top_students(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(state)?;
    let conn = db_conn(state)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.external_id, s.name, c.name, s.point_total
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id
             WHERE s.point_total > 0
             ORDER BY s.point_total DESC, s.name
             LIMIT 5",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            let class_name: Option<String> = r.get(2)?;
            Ok(json!({
                "externalId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "className": class_name.unwrap_or_else(|| "-".to_string()),
                "pointTotal": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "students": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.summary" => dashboard_summary(state, req),
        "dashboard.monthly" => dashboard_monthly(state, req),
        "dashboard.categories" => dashboard_categories(state, req),
        "dashboard.topStudents" => dashboard_top_students(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifted_month_crosses_year_boundary() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap();
        assert_eq!(
            shifted_month(today, 0),
            NaiveDate::from_ymd_opt(2026, 2, 1)
        );
        assert_eq!(
            shifted_month(today, 3),
            NaiveDate::from_ymd_opt(2025, 11, 1)
        );
        assert_eq!(
            shifted_month(today, 5),
            NaiveDate::from_ymd_opt(2025, 9, 1)
        );
    }
}
