use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, db_err, get_required_str, require_manage, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role, Session};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = |state: &AppState| -> Result<(Session, serde_json::Value), HandlerErr> {
        let conn = db_conn(state)?;
        let email = get_required_str(&req.params, "email")?;
        let password = get_required_str(&req.params, "password")?;

        let row = conn
            .query_row(
                "SELECT id, name, role, pass_salt, pass_hash FROM profiles WHERE email = ?",
                [&email],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        // One error for both unknown email and wrong password.
        let (id, name, role_str, salt, stored_hash) =
            row.ok_or_else(|| HandlerErr::new("invalid_credentials", "email or password is incorrect"))?;
        if hash_password(&salt, &password) != stored_hash {
            return Err(HandlerErr::new(
                "invalid_credentials",
                "email or password is incorrect",
            ));
        }

        let role = Role::parse(&role_str)
            .ok_or_else(|| HandlerErr::new("invalid_credentials", "profile role is unknown"))?;
        let can_input = matches!(role, Role::Admin | Role::Supervisor);
        let can_manage = matches!(role, Role::Admin);

        let session = Session {
            user_id: id.clone(),
            token: Uuid::new_v4().to_string(),
        };
        let result = json!({
            "token": session.token,
            "profile": {
                "userId": id,
                "name": name,
                "role": role.as_str(),
                "canInput": can_input,
                "canManage": can_manage,
            }
        });
        Ok((session, result))
    };

    match inner(state) {
        Ok((session, result)) => {
            log::info!("sign-in for user {}", session.user_id);
            state.session = Some(session);
            ok(&req.id, result)
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.session = None;
    ok(&req.id, json!({ "signedOut": true }))
}

fn handle_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
    match crate::ipc::helpers::require_caller(state) {
        Ok(caller) => ok(&req.id, caller.capabilities_json()),
        Err(e) => e.response(&req.id),
    }
}

fn profiles_empty(conn: &rusqlite::Connection) -> Result<bool, HandlerErr> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM profiles", [], |r| r.get(0))
        .map_err(db_err)?;
    Ok(count == 0)
}

fn handle_profiles_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = |state: &AppState| -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;

        // Bootstrap: the very first profile may be created without a
        // session; everything after that is admin-only.
        if !profiles_empty(conn)? {
            require_manage(state)?;
        }

        let email = get_required_str(&req.params, "email")?;
        let password = get_required_str(&req.params, "password")?;
        let name = get_required_str(&req.params, "name")?;
        let role_str = get_required_str(&req.params, "role")?;
        let role = Role::parse(&role_str).ok_or_else(|| {
            HandlerErr::with_details(
                "bad_params",
                "role must be one of: admin, supervisor, leadership",
                json!({ "role": role_str }),
            )
        })?;
        if password.len() < 8 {
            return Err(HandlerErr::new(
                "bad_params",
                "password must be at least 8 characters",
            ));
        }

        let id = Uuid::new_v4().to_string();
        let salt = Uuid::new_v4().to_string();
        let hash = hash_password(&salt, &password);
        let created_at = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO profiles(id, email, name, role, pass_salt, pass_hash, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (&id, &email, &name, role.as_str(), &salt, &hash, &created_at),
        )
        .map_err(|e| HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "profiles" }),
        ))?;

        Ok(json!({ "userId": id, "email": email, "role": role.as_str() }))
    };

    match inner(state) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_profiles_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = |state: &AppState| -> Result<serde_json::Value, HandlerErr> {
        require_manage(state)?;
        let conn = db_conn(state)?;
        let mut stmt = conn
            .prepare("SELECT id, email, name, role, created_at FROM profiles ORDER BY name")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(json!({
                    "userId": r.get::<_, String>(0)?,
                    "email": r.get::<_, String>(1)?,
                    "name": r.get::<_, String>(2)?,
                    "role": r.get::<_, String>(3)?,
                    "createdAt": r.get::<_, String>(4)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        Ok(json!({ "profiles": rows }))
    };

    match inner(state) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        "auth.profile" => Some(handle_profile(state, req)),
        "profiles.create" => Some(handle_profiles_create(state, req)),
        "profiles.list" => Some(handle_profiles_list(state, req)),
        _ => None,
    }
}
