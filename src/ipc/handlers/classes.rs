use crate::ipc::helpers::{
    get_optional_str, get_required_str, respond, status_param, store_err, workspace, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Class, Enrollment, Lecture, Student, STATUS_ACTIVE, STATUS_INACTIVE};
use crate::sheets::{append_row, update_row};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

const CLASS_STATUSES: [&str; 2] = [STATUS_ACTIVE, STATUS_INACTIVE];
const LECTURE_STATUSES: [&str; 3] = ["scheduled", "held", "cancelled"];

fn handle_classes_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Ok((_, data)) = workspace(state) else {
        return Ok(json!({ "classes": [] }));
    };
    let status = get_optional_str(&req.params, "status").filter(|s| !s.is_empty());

    // Counts let the UI show a useful dashboard.
    let classes: Vec<serde_json::Value> = data
        .classes
        .iter()
        .filter(|c| status.as_deref().map(|st| c.status == st).unwrap_or(true))
        .map(|c| {
            let student_count = data
                .enrollments
                .iter()
                .filter(|e| e.class_id == c.id && e.status == STATUS_ACTIVE)
                .count();
            let lecture_count = data.lectures.iter().filter(|l| l.class_id == c.id).count();
            let mut v = json!(c);
            v["studentCount"] = json!(student_count);
            v["lectureCount"] = json!(lecture_count);
            v
        })
        .collect();
    Ok(json!({ "classes": classes }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let p = &req.params;
    let class = Class {
        id: Uuid::new_v4().to_string(),
        school: get_required_str(p, "school")?,
        year: get_optional_str(p, "year").unwrap_or_default(),
        semester: get_optional_str(p, "semester").unwrap_or_default(),
        generation: get_optional_str(p, "generation").unwrap_or_default(),
        schedule: get_optional_str(p, "schedule").unwrap_or_default(),
        status: status_param(p, "status", &CLASS_STATUSES, STATUS_ACTIVE)?,
    };

    append_row(conn, &class).map_err(store_err("db_insert_failed"))?;
    let class_id = class.id.clone();
    data.classes.push(class);
    Ok(json!({ "classId": class_id }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let Some(idx) = data.classes.iter().position(|c| c.id == class_id) else {
        return Err(HandlerErr::not_found("class not found"));
    };

    let mut next = data.classes[idx].clone();
    for (key, slot) in [
        ("school", &mut next.school),
        ("year", &mut next.year),
        ("semester", &mut next.semester),
        ("generation", &mut next.generation),
        ("schedule", &mut next.schedule),
    ] {
        if let Some(v) = get_optional_str(patch, key) {
            *slot = v;
        }
    }
    if patch.get("status").is_some() {
        next.status = status_param(patch, "status", &CLASS_STATUSES, STATUS_ACTIVE)?;
    }

    if !update_row(conn, &next).map_err(store_err("db_update_failed"))? {
        return Err(HandlerErr::not_found("class not found"));
    }
    data.classes[idx] = next;
    Ok(json!({ "ok": true }))
}

/// Class with its actively enrolled students and its lectures by date.
fn handle_classes_details(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, data) = workspace(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    let Some(class) = data.classes.iter().find(|c| c.id == class_id) else {
        return Err(HandlerErr::not_found("class not found"));
    };

    let students: Vec<serde_json::Value> = data
        .enrollments
        .iter()
        .filter(|e| e.class_id == class_id && e.status == STATUS_ACTIVE)
        .filter_map(|e| {
            let s: &Student = data.students.iter().find(|s| s.id == e.student_id)?;
            let mut v = json!(s);
            v["enrollmentId"] = json!(e.id);
            Some(v)
        })
        .collect();

    let mut lectures: Vec<&Lecture> = data
        .lectures
        .iter()
        .filter(|l| l.class_id == class_id)
        .collect();
    lectures.sort_by(|a, b| a.date.cmp(&b.date));

    Ok(json!({
        "class": class,
        "students": students,
        "lectures": lectures,
    }))
}

fn handle_lectures_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let p = &req.params;
    let class_id = get_required_str(p, "classId")?;
    if !data.classes.iter().any(|c| c.id == class_id) {
        return Err(HandlerErr::not_found("class not found"));
    }
    let lecture = Lecture {
        id: Uuid::new_v4().to_string(),
        class_id,
        date: get_required_str(p, "date")?,
        topic: get_optional_str(p, "topic").unwrap_or_default(),
        status: status_param(p, "status", &LECTURE_STATUSES, "scheduled")?,
    };

    append_row(conn, &lecture).map_err(store_err("db_insert_failed"))?;
    let lecture_id = lecture.id.clone();
    data.lectures.push(lecture);
    Ok(json!({ "lectureId": lecture_id }))
}

/// Enrolls a student; an existing enrollment for the same pair is reactivated.
fn handle_enrollments_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let class_id = get_required_str(&req.params, "classId")?;
    if !data.students.iter().any(|s| s.id == student_id) {
        return Err(HandlerErr::not_found("student not found"));
    }
    if !data.classes.iter().any(|c| c.id == class_id) {
        return Err(HandlerErr::not_found("class not found"));
    }

    if let Some(idx) = data
        .enrollments
        .iter()
        .position(|e| e.student_id == student_id && e.class_id == class_id)
    {
        let mut next = data.enrollments[idx].clone();
        next.status = STATUS_ACTIVE.to_string();
        update_row(conn, &next).map_err(store_err("db_update_failed"))?;
        let enrollment_id = next.id.clone();
        data.enrollments[idx] = next;
        return Ok(json!({ "enrollmentId": enrollment_id, "created": false }));
    }

    let enrollment = Enrollment {
        id: Uuid::new_v4().to_string(),
        student_id,
        class_id,
        status: STATUS_ACTIVE.to_string(),
    };
    append_row(conn, &enrollment).map_err(store_err("db_insert_failed"))?;
    info!(
        student_id = %enrollment.student_id,
        class_id = %enrollment.class_id,
        "student enrolled"
    );
    let enrollment_id = enrollment.id.clone();
    data.enrollments.push(enrollment);
    Ok(json!({ "enrollmentId": enrollment_id, "created": true }))
}

fn handle_enrollments_set_status(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let enrollment_id = get_required_str(&req.params, "enrollmentId")?;
    let status = status_param(&req.params, "status", &CLASS_STATUSES, STATUS_ACTIVE)?;
    let Some(idx) = data.enrollments.iter().position(|e| e.id == enrollment_id) else {
        return Err(HandlerErr::not_found("enrollment not found"));
    };

    let mut next = data.enrollments[idx].clone();
    next.status = status;
    update_row(conn, &next).map_err(store_err("db_update_failed"))?;
    data.enrollments[idx] = next;
    Ok(json!({ "enrollmentId": enrollment_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => handle_classes_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.details" => handle_classes_details(state, req),
        "lectures.create" => handle_lectures_create(state, req),
        "enrollments.create" => handle_enrollments_create(state, req),
        "enrollments.setStatus" => handle_enrollments_set_status(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
