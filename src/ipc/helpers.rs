use crate::ipc::error::err;
use crate::ipc::types::{AppState, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_err(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// The profile and capability flags derived for the current session. Pure
/// derivation over the profile row; a missing row yields no capabilities.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn can_input(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Supervisor)
    }

    pub fn can_manage(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    pub fn capabilities_json(&self) -> serde_json::Value {
        json!({
            "userId": self.user_id,
            "name": self.name,
            "role": self.role.as_str(),
            "canInput": self.can_input(),
            "canManage": self.can_manage(),
        })
    }
}

/// Resolve the session to a live profile row. Fails closed: no session, or
/// a session whose profile has since been deleted, is not authenticated.
pub fn require_caller(state: &AppState) -> Result<Caller, HandlerErr> {
    let conn = db_conn(state)?;
    let session = state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("not_authenticated", "sign in first"))?;

    let row = conn
        .query_row(
            "SELECT name, role FROM profiles WHERE id = ?",
            [&session.user_id],
            |r| {
                let name: String = r.get(0)?;
                let role: String = r.get(1)?;
                Ok((name, role))
            },
        )
        .optional()
        .map_err(db_err)?;

    let (name, role_str) =
        row.ok_or_else(|| HandlerErr::new("not_authenticated", "profile no longer exists"))?;
    let role = Role::parse(&role_str)
        .ok_or_else(|| HandlerErr::new("not_authenticated", "profile role is unknown"))?;

    Ok(Caller {
        user_id: session.user_id.clone(),
        name,
        role,
    })
}

pub fn require_input(state: &AppState) -> Result<Caller, HandlerErr> {
    let caller = require_caller(state)?;
    if !caller.can_input() {
        return Err(HandlerErr::new(
            "forbidden",
            "role is not allowed to record violations",
        ));
    }
    Ok(caller)
}

pub fn require_manage(state: &AppState) -> Result<Caller, HandlerErr> {
    let caller = require_caller(state)?;
    if !caller.can_manage() {
        return Err(HandlerErr::new(
            "forbidden",
            "role is not allowed to manage master data",
        ));
    }
    Ok(caller)
}
