use crate::exams::{exam_detail, exam_max_score, exam_meta, exam_problems_sorted};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, respond, roster_policy, store_err, with_tx, workspace,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Exam, ExamProblem, Problem, EXAM_STATUS_PENDING, STATUS_ACTIVE};
use crate::sheets::{append_row, delete_where, update_row, Entity};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

const EXAM_STATUSES: [&str; 3] = [EXAM_STATUS_PENDING, STATUS_ACTIVE, "completed"];

#[derive(Debug, Deserialize)]
struct SubmitExam {
    #[serde(default, alias = "examId")]
    exam_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    date: String,
    #[serde(default, alias = "classId")]
    class_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    problems: Vec<SubmitProblem>,
}

#[derive(Debug, Deserialize)]
struct SubmitProblem {
    #[serde(default, alias = "problemId")]
    problem_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(alias = "maxScore")]
    max_score: f64,
    #[serde(default, alias = "problemNumber")]
    problem_number: Option<i64>,
}

fn handle_exams_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, data) = workspace(state)?;
    let exams: Vec<serde_json::Value> = data
        .exams
        .iter()
        .map(|exam| {
            let sorted = exam_problems_sorted(&data.exam_problems, &exam.id);
            let meta = exam_meta(exam, &sorted);
            let scored: HashSet<&str> = data
                .scores
                .iter()
                .filter(|s| s.exam_id == exam.id)
                .map(|s| s.student_id.as_str())
                .collect();
            json!({
                "id": exam.id,
                "title": exam.title,
                "description": exam.description,
                "classId": meta.class_id,
                "date": meta.date,
                "status": meta.status,
                "problemCount": sorted.len(),
                "maxScore": exam_max_score(&sorted),
                "scoredStudentCount": scored.len(),
            })
        })
        .collect();
    Ok(json!({ "exams": exams }))
}

fn handle_exams_detail(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let exam_id = get_required_str(&req.params, "examId")?;
    let policy = roster_policy(conn);
    let Some(detail) = exam_detail(data, &exam_id, policy) else {
        return Err(HandlerErr::not_found("Exam not found").with_details(json!({ "examId": exam_id })));
    };
    let mut v = json!(detail);
    v["rosterPolicy"] = json!(policy.as_str());
    Ok(v)
}

/// Creates or replaces an exam together with its problem rows.
///
/// Every problem row is stamped with the exam's date, class and status so the
/// per-row copies never disagree with the exam header.
fn handle_exams_submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let body: SubmitExam = serde_json::from_value(req.params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid exam: {}", e)))?;

    let title = body.title.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr::bad_params("title must not be empty"));
    }
    let status = body
        .status
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| EXAM_STATUS_PENDING.to_string());
    if !EXAM_STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "status must be one of: {}",
            EXAM_STATUSES.join(", ")
        )));
    }
    let class_id = body.class_id.trim().to_string();
    if !class_id.is_empty() && !data.classes.iter().any(|c| c.id == class_id) {
        return Err(HandlerErr::not_found("class not found").with_details(json!({ "classId": class_id })));
    }
    let existing_idx = match body.exam_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => Some(
            data.exams
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| HandlerErr::not_found("Exam not found").with_details(json!({ "examId": id })))?,
        ),
        None => None,
    };

    let exam = Exam {
        id: existing_idx
            .map(|i| data.exams[i].id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        title,
        description: body.description.trim().to_string(),
        class_id: class_id.clone(),
        date: body.date.trim().to_string(),
        status: status.clone(),
    };

    let mut new_problems: Vec<Problem> = Vec::new();
    let mut rows: Vec<ExamProblem> = Vec::with_capacity(body.problems.len());
    let mut numbers: HashSet<i64> = HashSet::new();
    for (i, p) in body.problems.into_iter().enumerate() {
        let at = json!({ "index": i });
        if !p.max_score.is_finite() || p.max_score < 0.0 {
            return Err(HandlerErr::bad_params("max_score must be >= 0").with_details(at));
        }
        let problem_number = p.problem_number.unwrap_or(i as i64 + 1);
        if !numbers.insert(problem_number) {
            return Err(HandlerErr::bad_params("problem_number must be unique within an exam")
                .with_details(json!({ "index": i, "problemNumber": problem_number })));
        }
        let problem_id = match p.problem_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            Some(id) => {
                if !data.problems.iter().any(|x| x.id == id) {
                    return Err(HandlerErr::not_found("problem not found")
                        .with_details(json!({ "index": i, "problemId": id })));
                }
                id
            }
            None => {
                let title = p.title.map(|s| s.trim().to_string()).unwrap_or_default();
                if title.is_empty() {
                    return Err(HandlerErr::bad_params("problem needs problem_id or title").with_details(at));
                }
                let problem = Problem {
                    id: Uuid::new_v4().to_string(),
                    title,
                    description: p.description.map(|s| s.trim().to_string()).unwrap_or_default(),
                };
                let id = problem.id.clone();
                new_problems.push(problem);
                id
            }
        };
        rows.push(ExamProblem {
            id: Uuid::new_v4().to_string(),
            exam_id: exam.id.clone(),
            problem_id,
            max_score: p.max_score,
            problem_number,
            date: exam.date.clone(),
            class_id: class_id.clone(),
            status: status.clone(),
        });
    }

    with_tx(conn, |tx| {
        for problem in &new_problems {
            append_row(tx, problem).map_err(store_err("db_insert_failed"))?;
        }
        if existing_idx.is_some() {
            update_row(tx, &exam).map_err(store_err("db_update_failed"))?;
            delete_where(tx, Entity::ExamProblems, "exam_id", &exam.id)
                .map_err(store_err("db_delete_failed"))?;
        } else {
            append_row(tx, &exam).map_err(store_err("db_insert_failed"))?;
        }
        for row in &rows {
            append_row(tx, row).map_err(store_err("db_insert_failed"))?;
        }
        Ok(())
    })?;

    info!(
        exam_id = %exam.id,
        problems = rows.len(),
        created = existing_idx.is_none(),
        "exam saved"
    );
    let exam_id = exam.id.clone();
    let problem_count = rows.len();
    data.problems.extend(new_problems);
    data.exam_problems.retain(|ep| ep.exam_id != exam_id);
    data.exam_problems.extend(rows);
    match existing_idx {
        Some(i) => data.exams[i] = exam,
        None => data.exams.push(exam),
    }

    Ok(json!({
        "examId": exam_id,
        "problemCount": problem_count,
        "created": existing_idx.is_none(),
    }))
}

fn handle_problems_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, data) = workspace(state)?;
    Ok(json!({ "problems": data.problems }))
}

fn handle_problems_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let problem = Problem {
        id: Uuid::new_v4().to_string(),
        title: get_required_str(&req.params, "title")?,
        description: get_optional_str(&req.params, "description").unwrap_or_default(),
    };
    append_row(conn, &problem).map_err(store_err("db_insert_failed"))?;
    let problem_id = problem.id.clone();
    data.problems.push(problem);
    Ok(json!({ "problemId": problem_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "exams.list" => handle_exams_list(state, req),
        "exams.detail" => handle_exams_detail(state, req),
        "exams.submit" => handle_exams_submit(state, req),
        "problems.list" => handle_problems_list(state, req),
        "problems.create" => handle_problems_create(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
