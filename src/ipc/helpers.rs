use crate::db;
use crate::exams::RosterPolicy;
use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::sheets::{Dataset, SheetError};
use rusqlite::Connection;
use serde_json::json;
use tracing::warn;

pub const ROSTER_POLICY_KEY: &str = "exams.rosterPolicy";

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

/// Maps a store error onto the handler's own code; decode errors keep theirs.
pub fn store_err(code: &'static str) -> impl Fn(SheetError) -> HandlerErr {
    move |e| match e {
        SheetError::Sql(inner) => HandlerErr::new(code, inner.to_string()),
        other => HandlerErr::new("sheet_decode_failed", other.to_string()),
    }
}

pub fn sql_err(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string())
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

/// Connection plus cached sheets of the selected workspace.
pub fn workspace(state: &mut AppState) -> Result<(&Connection, &mut Dataset), HandlerErr> {
    match (state.db.as_ref(), state.data.as_mut()) {
        (Some(conn), Some(data)) => Ok((conn, data)),
        _ => Err(HandlerErr::new("no_workspace", "select a workspace first")),
    }
}

pub fn roster_policy(conn: &Connection) -> RosterPolicy {
    match db::settings_get_json(conn, ROSTER_POLICY_KEY) {
        Ok(Some(v)) => v
            .as_str()
            .and_then(RosterPolicy::parse)
            .unwrap_or_else(|| {
                warn!(value = %v, "unrecognised roster policy; using default");
                RosterPolicy::default()
            }),
        Ok(None) => RosterPolicy::default(),
        Err(e) => {
            warn!(error = %e, "failed to read roster policy; using default");
            RosterPolicy::default()
        }
    }
}

/// Runs `f` inside a transaction; commits only when it succeeds.
pub fn with_tx<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, HandlerErr>,
) -> Result<T, HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(sql_err("db_tx_failed"))?;
    match f(&tx) {
        Ok(v) => {
            tx.commit().map_err(sql_err("db_tx_failed"))?;
            Ok(v)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

pub fn status_param(
    params: &serde_json::Value,
    key: &str,
    allowed: &[&str],
    default: &str,
) -> Result<String, HandlerErr> {
    let status = get_optional_str(params, key)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string());
    if !allowed.contains(&status.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "{} must be one of: {}",
            key,
            allowed.join(", ")
        ))
        .with_details(json!({ key: status })));
    }
    Ok(status)
}
