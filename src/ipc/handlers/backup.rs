use crate::backup;
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{get_optional_str, get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn workspace_param(state: &AppState, params: &serde_json::Value) -> Result<PathBuf, HandlerErr> {
    match get_optional_str(params, "workspacePath").filter(|s| !s.is_empty()) {
        Some(p) => Ok(PathBuf::from(p)),
        None => state
            .workspace
            .clone()
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first")),
    }
}

fn handle_export(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let workspace = workspace_param(state, &req.params)?;
    let out_path = PathBuf::from(get_required_str(&req.params, "outPath")?);
    let summary = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    info!(out = %out_path.to_string_lossy(), bytes = summary.db_bytes, "workspace exported");
    Ok(json!({
        "bundleFormat": summary.bundle_format,
        "dbBytes": summary.db_bytes,
        "outPath": out_path.to_string_lossy(),
    }))
}

/// Importing over the selected workspace closes it first and reopens it afterwards.
fn handle_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let workspace = workspace_param(state, &req.params)?;
    let in_path = PathBuf::from(get_required_str(&req.params, "inPath")?);
    let is_selected = state.workspace.as_deref() == Some(workspace.as_path());
    if is_selected {
        state.db = None;
        state.data = None;
    }

    let imported = backup::import_workspace_bundle(&in_path, &workspace);

    if is_selected {
        if let Err(e) = open_workspace(state, &workspace) {
            warn!(error = %format!("{e:#}"), "failed to reopen workspace after import");
            state.workspace = None;
            return Err(HandlerErr::new("db_open_failed", format!("{e:#}")));
        }
    }

    let summary = imported.map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    info!(input = %in_path.to_string_lossy(), format = %summary.bundle_format_detected, "workspace imported");
    Ok(json!({
        "bundleFormatDetected": summary.bundle_format_detected,
        "workspacePath": workspace.to_string_lossy(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_export(state, req),
        "backup.importWorkspaceBundle" => handle_import(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
