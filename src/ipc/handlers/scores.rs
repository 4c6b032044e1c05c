use crate::exams::{reconcile_scores, ScoreEdit};
use crate::ipc::helpers::{get_required_str, respond, store_err, with_tx, workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Score;
use crate::sheets::{append_row, update_row};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

const SCORES_SAVE_MAX_EDITS: usize = 5000;

#[derive(Debug, Deserialize)]
struct SaveScores {
    #[serde(alias = "examId")]
    exam_id: String,
    #[serde(default)]
    scores: Vec<EditedScore>,
}

/// A client-sent `id` is ignored; edits match on exam, student and problem.
#[derive(Debug, Deserialize)]
struct EditedScore {
    #[serde(default, alias = "studentId")]
    student_id: String,
    #[serde(default, alias = "problemId")]
    problem_id: String,
    #[serde(default)]
    score: serde_json::Value,
    #[serde(default)]
    comment: Option<String>,
}

fn parse_score_value(v: &serde_json::Value) -> Option<f64> {
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 0.0).then_some(n)
}

fn parse_edits(raw: Vec<EditedScore>) -> Result<Vec<ScoreEdit>, HandlerErr> {
    if raw.len() > SCORES_SAVE_MAX_EDITS {
        return Err(HandlerErr::bad_params("too many score edits")
            .with_details(json!({ "max": SCORES_SAVE_MAX_EDITS, "got": raw.len() })));
    }
    raw.into_iter()
        .enumerate()
        .map(|(i, e)| {
            let student_id = e.student_id.trim().to_string();
            let problem_id = e.problem_id.trim().to_string();
            if student_id.is_empty() || problem_id.is_empty() {
                return Err(HandlerErr::bad_params("student_id and problem_id are required")
                    .with_details(json!({ "index": i })));
            }
            let Some(score) = parse_score_value(&e.score) else {
                return Err(HandlerErr::bad_params("score must be a number >= 0")
                    .with_details(json!({ "index": i, "score": e.score })));
            };
            Ok(ScoreEdit {
                student_id,
                problem_id,
                score,
                comment: e.comment.unwrap_or_default(),
            })
        })
        .collect()
}

fn handle_scores_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (_, data) = workspace(state)?;
    let exam_id = get_required_str(&req.params, "examId")?;
    let scores: Vec<&Score> = data.scores.iter().filter(|s| s.exam_id == exam_id).collect();
    Ok(json!({ "scores": scores }))
}

/// Reconciles a batch against a copy of the score set, writes the result in
/// one transaction, and only then swaps the copy into the cache.
fn handle_scores_save(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, data) = workspace(state)?;
    let body: SaveScores = serde_json::from_value(req.params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid scores: {}", e)))?;
    let exam_id = body.exam_id.trim().to_string();
    if !data.exams.iter().any(|e| e.id == exam_id) {
        return Err(HandlerErr::not_found("Exam not found").with_details(json!({ "examId": exam_id })));
    }
    let edits = parse_edits(body.scores)?;
    // Matching against a stand-in empty set would duplicate every stored key.
    if data.scores_degraded {
        warn!(exam_id = %exam_id, "refusing score save while the score sheet is unreadable");
        return Err(HandlerErr::new(
            "sheet_decode_failed",
            "score sheet could not be loaded; fix or remove the bad rows and reopen the workspace",
        ));
    }

    let mut next = data.scores.clone();
    let outcome = reconcile_scores(&mut next, &exam_id, &edits, chrono::Utc::now(), || {
        Uuid::new_v4().to_string()
    });

    if !outcome.is_empty() {
        with_tx(conn, |tx| {
            for s in &outcome.inserted {
                append_row(tx, s).map_err(store_err("db_insert_failed"))?;
            }
            for s in &outcome.updated {
                if !update_row(tx, s).map_err(store_err("db_update_failed"))? {
                    return Err(HandlerErr::new("db_update_failed", "score row disappeared")
                        .with_details(json!({ "scoreId": s.id })));
                }
            }
            Ok(())
        })?;
        data.scores = next;
    }

    info!(
        exam_id = %exam_id,
        inserted = outcome.inserted.len(),
        updated = outcome.updated.len(),
        unchanged = outcome.unchanged,
        "scores reconciled"
    );
    Ok(json!({
        "examId": exam_id,
        "inserted": outcome.inserted.len(),
        "updated": outcome.updated.len(),
        "unchanged": outcome.unchanged,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "scores.list" => handle_scores_list(state, req),
        "scores.save" => handle_scores_save(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
