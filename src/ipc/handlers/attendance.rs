use crate::ipc::helpers::{
    get_optional_str, get_required_str, respond, store_err, with_tx, workspace, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Attendance, ATTENDANCE_STATUSES};
use crate::sheets::{append_row, update_row};
use serde_json::json;
use uuid::Uuid;

fn handle_attendance_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, data) = workspace(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    let date = get_optional_str(&req.params, "date").filter(|s| !s.is_empty());

    let mut records: Vec<&Attendance> = data
        .attendance
        .iter()
        .filter(|a| a.class_id == class_id)
        .filter(|a| date.as_deref().map(|d| a.date == d).unwrap_or(true))
        .collect();
    records.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(json!({ "records": records }))
}

/// Upserts one attendance mark per student for a class day.
fn handle_attendance_record(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    let date = get_required_str(&req.params, "date")?;
    if !data.classes.iter().any(|c| c.id == class_id) {
        return Err(HandlerErr::not_found("class not found"));
    }
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };

    let mut marks: Vec<(String, String)> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let student_id = get_required_str(entry, "studentId")
            .map_err(|e| e.with_details(json!({ "index": i })))?;
        let status = get_required_str(entry, "status")
            .map_err(|e| e.with_details(json!({ "index": i })))?;
        if !ATTENDANCE_STATUSES.contains(&status.as_str()) {
            return Err(HandlerErr::bad_params(format!(
                "status must be one of: {}",
                ATTENDANCE_STATUSES.join(", ")
            ))
            .with_details(json!({ "index": i, "status": status })));
        }
        if !data.students.iter().any(|s| s.id == student_id) {
            return Err(HandlerErr::not_found("student not found")
                .with_details(json!({ "index": i, "studentId": student_id })));
        }
        marks.push((student_id, status));
    }

    let mut next = data.attendance.clone();
    let mut inserted: Vec<usize> = Vec::new();
    let mut updated: Vec<usize> = Vec::new();
    for (student_id, status) in marks {
        match next
            .iter()
            .position(|a| a.student_id == student_id && a.class_id == class_id && a.date == date)
        {
            Some(i) => {
                next[i].status = status;
                if !updated.contains(&i) && !inserted.contains(&i) {
                    updated.push(i);
                }
            }
            None => {
                next.push(Attendance {
                    id: Uuid::new_v4().to_string(),
                    student_id,
                    class_id: class_id.clone(),
                    date: date.clone(),
                    status,
                });
                inserted.push(next.len() - 1);
            }
        }
    }

    with_tx(conn, |tx| {
        for i in &inserted {
            append_row(tx, &next[*i]).map_err(store_err("db_insert_failed"))?;
        }
        for i in &updated {
            update_row(tx, &next[*i]).map_err(store_err("db_update_failed"))?;
        }
        Ok(())
    })?;

    data.attendance = next;
    Ok(json!({ "inserted": inserted.len(), "updated": updated.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.list" => handle_attendance_list(state, req),
        "attendance.record" => handle_attendance_record(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
