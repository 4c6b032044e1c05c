use crate::db;
use crate::exams::RosterPolicy;
use crate::ipc::helpers::{get_required_str, respond, workspace, HandlerErr, ROSTER_POLICY_KEY};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

fn validate(key: &str, value: &serde_json::Value) -> Result<(), HandlerErr> {
    if key == ROSTER_POLICY_KEY && value.as_str().and_then(RosterPolicy::parse).is_none() {
        return Err(HandlerErr::bad_params("rosterPolicy must be enrollment or activeStatus")
            .with_details(json!({ "value": value })));
    }
    Ok(())
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = workspace(state)?;
    let key = get_required_str(&req.params, "key")?;
    let value = db::settings_get_json(conn, &key)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    let value = match value {
        Some(v) => v,
        None if key == ROSTER_POLICY_KEY => json!(RosterPolicy::default().as_str()),
        None => serde_json::Value::Null,
    };
    Ok(json!({ "key": key, "value": value }))
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = workspace(state)?;
    let key = get_required_str(&req.params, "key")?;
    let Some(value) = req.params.get("value") else {
        return Err(HandlerErr::bad_params("missing value"));
    };
    validate(&key, value)?;
    db::settings_set_json(conn, &key, value)
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))?;
    info!(key = %key, value = %value, "setting updated");
    Ok(json!({ "key": key, "value": value }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "settings.get" => handle_settings_get(state, req),
        "settings.set" => handle_settings_set(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
