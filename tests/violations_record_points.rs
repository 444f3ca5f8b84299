use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_disiplind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn disiplind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    writeln!(
        stdin,
        "{}",
        json!({ "id": id, "method": method, "params": params })
    )
    .expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn expect_ok(resp: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(resp["ok"], json!(true), "expected ok response: {}", resp);
    &resp["result"]
}

fn error_code(resp: &serde_json::Value) -> String {
    resp["error"]["code"].as_str().unwrap_or("").to_string()
}

struct Fixture {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u32,
    _dir: tempfile::TempDir,
}

impl Fixture {
    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Workspace with a signed-in admin, one class, one student and two catalog
/// entries. Returns (fixture, student_id, type10_id, type25_id).
fn seeded_fixture() -> (Fixture, String, String, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ws = dir.path().join("ws");
    let (child, stdin, reader) = spawn_sidecar();
    let mut fx = Fixture {
        child,
        stdin,
        reader,
        next_id: 0,
        _dir: dir,
    };

    expect_ok(&fx.call("workspace.select", json!({ "path": ws.to_string_lossy() })));
    expect_ok(&fx.call(
        "profiles.create",
        json!({
            "email": "admin@example.org",
            "password": "admin-pass-1",
            "name": "Admin",
            "role": "admin"
        }),
    ));
    expect_ok(&fx.call(
        "auth.signIn",
        json!({ "email": "admin@example.org", "password": "admin-pass-1" }),
    ));

    let class = fx.call("classes.create", json!({ "name": "Grade 7B" }));
    let class_id = expect_ok(&class)["classId"].as_str().unwrap().to_string();
    let student = fx.call(
        "students.create",
        json!({ "externalId": "S-0042", "name": "Aisha Rahman", "classId": class_id }),
    );
    let student_id = expect_ok(&student)["studentId"]
        .as_str()
        .unwrap()
        .to_string();

    let t10 = fx.call(
        "catalog.create",
        json!({ "name": "Late for roll call", "category": "light", "points": 10 }),
    );
    let type10 = expect_ok(&t10)["violationTypeId"]
        .as_str()
        .unwrap()
        .to_string();
    let t25 = fx.call(
        "catalog.create",
        json!({ "name": "Leaving grounds without leave", "category": "severe", "points": 25 }),
    );
    let type25 = expect_ok(&t25)["violationTypeId"]
        .as_str()
        .unwrap()
        .to_string();

    (fx, student_id, type10, type25)
}

fn point_total(fx: &mut Fixture, student_id: &str) -> i64 {
    let resp = fx.call("students.list", json!({}));
    expect_ok(&resp)["students"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"] == json!(student_id))
        .expect("student present")["pointTotal"]
        .as_i64()
        .unwrap()
}

#[test]
fn recording_adds_points_and_exactly_one_history_row() {
    let (mut fx, student_id, type10, type25) = seeded_fixture();

    let first = fx.call(
        "violations.record",
        json!({ "studentId": student_id, "violationTypeId": type10, "date": "2026-02-10" }),
    );
    assert_eq!(expect_ok(&first)["newTotal"], json!(10));

    let second = fx.call(
        "violations.record",
        json!({
            "studentId": student_id,
            "violationTypeId": type25,
            "date": "2026-02-11",
            "note": "second offence this week"
        }),
    );
    let result = expect_ok(&second);
    assert_eq!(result["priorTotal"], json!(10));
    assert_eq!(result["newTotal"], json!(35));

    assert_eq!(point_total(&mut fx, &student_id), 35);

    let history = fx.call("history.list", json!({}));
    let events = expect_ok(&history)["events"].as_array().unwrap().clone();
    assert_eq!(events.len(), 2);
    // Newest first.
    assert_eq!(events[0]["violationName"], json!("Leaving grounds without leave"));
    assert_eq!(events[0]["points"], json!(25));
    assert_eq!(events[0]["studentName"], json!("Aisha Rahman"));
    assert_eq!(events[0]["note"], json!("second offence this week"));
    assert_eq!(events[1]["points"], json!(10));
}

#[test]
fn missing_fields_are_rejected_with_field_errors_and_no_writes() {
    let (mut fx, student_id, type10, _) = seeded_fixture();

    let resp = fx.call("violations.record", json!({ "date": "2026-02-10" }));
    assert_eq!(error_code(&resp), "validation_failed");
    let fields = &resp["error"]["details"]["fields"];
    assert!(fields.get("studentId").is_some());
    assert!(fields.get("violationTypeId").is_some());
    assert!(fields.get("date").is_none());

    let bad_date = fx.call(
        "violations.record",
        json!({ "studentId": student_id, "violationTypeId": type10, "date": "10/02/2026" }),
    );
    assert_eq!(error_code(&bad_date), "validation_failed");
    assert!(bad_date["error"]["details"]["fields"].get("date").is_some());

    // Zero side effects from either rejection.
    assert_eq!(point_total(&mut fx, &student_id), 0);
    let history = fx.call("history.list", json!({}));
    assert_eq!(expect_ok(&history)["events"].as_array().unwrap().len(), 0);
}

#[test]
fn unknown_student_or_type_leaves_no_partial_write() {
    let (mut fx, student_id, _type10, _) = seeded_fixture();

    let resp = fx.call(
        "violations.record",
        json!({ "studentId": student_id, "violationTypeId": "missing", "date": "2026-02-10" }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let resp = fx.call(
        "violations.record",
        json!({ "studentId": "missing", "violationTypeId": "missing", "date": "2026-02-10" }),
    );
    assert_eq!(error_code(&resp), "not_found");

    assert_eq!(point_total(&mut fx, &student_id), 0);
    let history = fx.call("history.list", json!({}));
    assert_eq!(expect_ok(&history)["events"].as_array().unwrap().len(), 0);
}

#[test]
fn leadership_role_cannot_record_but_can_read() {
    let (mut fx, student_id, type10, _) = seeded_fixture();

    expect_ok(&fx.call(
        "profiles.create",
        json!({
            "email": "head@example.org",
            "password": "head-pass-1",
            "name": "Head of School",
            "role": "leadership"
        }),
    ));
    expect_ok(&fx.call(
        "auth.signIn",
        json!({ "email": "head@example.org", "password": "head-pass-1" }),
    ));

    let denied = fx.call(
        "violations.record",
        json!({ "studentId": student_id, "violationTypeId": type10, "date": "2026-02-10" }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    // Reads stay open to leadership.
    expect_ok(&fx.call("history.list", json!({})));
    expect_ok(&fx.call("dashboard.summary", json!({})));

    // And master-data management is admin only.
    let denied = fx.call("classes.create", json!({ "name": "Grade 9C" }));
    assert_eq!(error_code(&denied), "forbidden");
}

#[test]
fn recount_totals_matches_event_history() {
    let (mut fx, student_id, type10, type25) = seeded_fixture();

    for date in ["2026-01-05", "2026-01-06"] {
        expect_ok(&fx.call(
            "violations.record",
            json!({ "studentId": student_id, "violationTypeId": type10, "date": date }),
        ));
    }
    expect_ok(&fx.call(
        "violations.record",
        json!({ "studentId": student_id, "violationTypeId": type25, "date": "2026-01-07" }),
    ));
    assert_eq!(point_total(&mut fx, &student_id), 45);

    // Recount is idempotent when totals already agree with history.
    expect_ok(&fx.call("violations.recountTotals", json!({})));
    assert_eq!(point_total(&mut fx, &student_id), 45);
}

#[test]
fn history_filters_by_date_range_and_search() {
    let (mut fx, student_id, type10, type25) = seeded_fixture();

    expect_ok(&fx.call(
        "violations.record",
        json!({ "studentId": student_id, "violationTypeId": type10, "date": "2026-01-05" }),
    ));
    expect_ok(&fx.call(
        "violations.record",
        json!({ "studentId": student_id, "violationTypeId": type25, "date": "2026-03-20" }),
    ));

    let january = fx.call(
        "history.list",
        json!({ "from": "2026-01-01", "to": "2026-01-31" }),
    );
    let events = expect_ok(&january)["events"].as_array().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["date"], json!("2026-01-05"));

    let by_violation = fx.call("history.list", json!({ "search": "Leaving grounds" }));
    let events = expect_ok(&by_violation)["events"].as_array().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["points"], json!(25));

    let by_external_id = fx.call("history.list", json!({ "search": "S-0042" }));
    assert_eq!(
        expect_ok(&by_external_id)["events"].as_array().unwrap().len(),
        2
    );

    let no_match = fx.call("history.list", json!({ "search": "zzz-no-such" }));
    assert_eq!(expect_ok(&no_match)["events"].as_array().unwrap().len(), 0);
}
