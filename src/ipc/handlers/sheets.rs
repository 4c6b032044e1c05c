use crate::ipc::helpers::{get_required_str, respond, store_err, workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sheets::{cell_to_json, load_list, Entity};
use serde_json::json;

fn handle_sheets_load(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = workspace(state)?;
    let name = get_required_str(&req.params, "entity")?;
    let entity = Entity::parse(&name).ok_or_else(|| {
        HandlerErr::bad_params("unknown entity").with_details(json!({
            "entity": name,
            "known": Entity::ALL.iter().map(|e| e.table()).collect::<Vec<_>>(),
        }))
    })?;

    let rows = load_list(conn, entity).map_err(store_err("db_query_failed"))?;
    let rows: Vec<Vec<serde_json::Value>> = rows
        .iter()
        .map(|r| r.iter().map(cell_to_json).collect())
        .collect();
    Ok(json!({
        "entity": entity.table(),
        "columns": entity.columns(),
        "rows": rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sheets.load" => Some(respond(&req.id, handle_sheets_load(state, req))),
        _ => None,
    }
}
