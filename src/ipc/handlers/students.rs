use crate::ipc::helpers::{
    get_optional_str, get_required_str, respond, status_param, store_err, with_tx, workspace,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Student, STATUS_ACTIVE, STATUS_INACTIVE};
use crate::sheets::{append_row, delete_where, update_row, Entity};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

const STUDENT_STATUSES: [&str; 2] = [STATUS_ACTIVE, STATUS_INACTIVE];

fn handle_students_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, data) = workspace(state)?;
    let status = get_optional_str(&req.params, "status").filter(|s| !s.is_empty());
    let search = get_optional_str(&req.params, "search")
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase());

    let students: Vec<&Student> = data
        .students
        .iter()
        .filter(|s| status.as_deref().map(|st| s.status == st).unwrap_or(true))
        .filter(|s| {
            search
                .as_deref()
                .map(|q| s.name.to_lowercase().contains(q) || s.school.to_lowercase().contains(q))
                .unwrap_or(true)
        })
        .collect();
    Ok(json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let p = &req.params;
    let student = Student {
        id: Uuid::new_v4().to_string(),
        name: get_required_str(p, "name")?,
        school: get_optional_str(p, "school").unwrap_or_default(),
        generation: get_optional_str(p, "generation").unwrap_or_default(),
        enrollment_date: get_optional_str(p, "enrollmentDate")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string()),
        status: status_param(p, "status", &STUDENT_STATUSES, STATUS_ACTIVE)?,
    };

    append_row(conn, &student).map_err(store_err("db_insert_failed"))?;
    let student_id = student.id.clone();
    data.students.push(student);
    Ok(json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let Some(idx) = data.students.iter().position(|s| s.id == student_id) else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let mut next = data.students[idx].clone();
    if let Some(v) = get_optional_str(patch, "name") {
        if v.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        next.name = v;
    }
    if let Some(v) = get_optional_str(patch, "school") {
        next.school = v;
    }
    if let Some(v) = get_optional_str(patch, "generation") {
        next.generation = v;
    }
    if let Some(v) = get_optional_str(patch, "enrollmentDate") {
        next.enrollment_date = v;
    }
    if patch.get("status").is_some() {
        next.status = status_param(patch, "status", &STUDENT_STATUSES, STATUS_ACTIVE)?;
    }

    if !update_row(conn, &next).map_err(store_err("db_update_failed"))? {
        return Err(HandlerErr::not_found("student not found"));
    }
    data.students[idx] = next;
    Ok(json!({ "ok": true }))
}

/// Removes the student and every row that references it.
fn handle_students_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    if !data.students.iter().any(|s| s.id == student_id) {
        return Err(HandlerErr::not_found("student not found"));
    }

    let removed = with_tx(conn, |tx| {
        let del = store_err("db_delete_failed");
        let scores = delete_where(tx, Entity::Scores, "student_id", &student_id).map_err(&del)?;
        let enrollments =
            delete_where(tx, Entity::Enrollments, "student_id", &student_id).map_err(&del)?;
        let attendance =
            delete_where(tx, Entity::Attendance, "student_id", &student_id).map_err(&del)?;
        delete_where(tx, Entity::Students, "id", &student_id).map_err(&del)?;
        Ok(json!({
            "scores": scores,
            "enrollments": enrollments,
            "attendance": attendance,
        }))
    })?;

    data.scores.retain(|s| s.student_id != student_id);
    data.enrollments.retain(|e| e.student_id != student_id);
    data.attendance.retain(|a| a.student_id != student_id);
    data.students.retain(|s| s.id != student_id);
    info!(student_id = %student_id, removed = %removed, "student deleted");
    Ok(json!({ "ok": true, "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
