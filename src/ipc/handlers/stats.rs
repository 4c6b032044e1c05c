use crate::ipc::helpers::{respond, workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::stats::summarize;
use serde_json::json;

fn handle_stats_summary(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, data) = workspace(state)?;
    Ok(json!(summarize(data)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.summary" => Some(respond(&req.id, handle_stats_summary(state, req))),
        _ => None,
    }
}
