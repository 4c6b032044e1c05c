use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sheets;
use anyhow::Context;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Opens the workspace store and loads every sheet before swapping it into
/// `state`. On failure the previous workspace stays selected.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    let data = sheets::load_dataset(&conn)
        .with_context(|| format!("failed to load sheets from {}", path.to_string_lossy()))?;
    info!(
        workspace = %path.to_string_lossy(),
        students = data.students.len(),
        exams = data.exams.len(),
        scores = data.scores.len(),
        scores_degraded = data.scores_degraded,
        "workspace opened"
    );
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.data = Some(data);
    Ok(())
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    if let Err(e) = open_workspace(state, &path) {
        warn!(error = %format!("{e:#}"), "workspace select failed");
        return err(&req.id, "db_open_failed", format!("{e:#}"), None);
    }

    let counts = state.data.as_ref().map(|d| {
        json!({
            "students": d.students.len(),
            "classes": d.classes.len(),
            "exams": d.exams.len(),
            "problems": d.problems.len(),
            "scores": d.scores.len(),
            "scoresDegraded": d.scores_degraded,
        })
    });
    ok(
        &req.id,
        json!({ "workspacePath": path.to_string_lossy(), "counts": counts }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
