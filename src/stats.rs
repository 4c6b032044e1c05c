use crate::model::{ExamProblem, Score, SCORE_STATUS_GRADED, STATUS_ACTIVE};
use crate::sheets::Dataset;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub student_count: usize,
    pub active_student_count: usize,
    pub class_count: usize,
    pub active_class_count: usize,
    pub exam_count: usize,
    pub active_exam_count: usize,
    pub problem_count: usize,
    pub graded_score_count: usize,
    pub average_percentage: i64,
}

/// Distinct exam ids among problem rows marked active.
pub fn active_exam_count(exam_problems: &[ExamProblem]) -> usize {
    let mut seen: HashSet<&str> = HashSet::new();
    exam_problems
        .iter()
        .filter(|ep| ep.status == STATUS_ACTIVE)
        .filter(|ep| seen.insert(ep.exam_id.as_str()))
        .count()
}

/// Mean percentage over every (exam, student) pair that has scores.
///
/// Pairs whose exam has no marks available are skipped. Group percentages
/// are averaged unrounded; only the result is rounded.
pub fn overall_average_percentage(exam_problems: &[ExamProblem], scores: &[Score]) -> i64 {
    let mut exam_max: HashMap<&str, f64> = HashMap::new();
    for ep in exam_problems {
        *exam_max.entry(ep.exam_id.as_str()).or_insert(0.0) += ep.max_score;
    }

    // Insertion-ordered so the float sum is deterministic.
    let mut order: Vec<(&str, &str)> = Vec::new();
    let mut totals: HashMap<(&str, &str), f64> = HashMap::new();
    for s in scores {
        let key = (s.exam_id.as_str(), s.student_id.as_str());
        let slot = totals.entry(key).or_insert_with(|| {
            order.push(key);
            0.0
        });
        *slot += s.score;
    }

    let percentages: Vec<f64> = order
        .iter()
        .filter_map(|key| {
            let max = exam_max.get(key.0).copied().unwrap_or(0.0);
            if max == 0.0 {
                return None;
            }
            Some(totals[key] / max * 100.0)
        })
        .collect();

    if percentages.is_empty() {
        return 0;
    }
    (percentages.iter().sum::<f64>() / percentages.len() as f64).round() as i64
}

pub fn summarize(data: &Dataset) -> Summary {
    Summary {
        student_count: data.students.len(),
        active_student_count: data.students.iter().filter(|s| s.is_active()).count(),
        class_count: data.classes.len(),
        active_class_count: data
            .classes
            .iter()
            .filter(|c| c.status == STATUS_ACTIVE)
            .count(),
        exam_count: data.exams.len(),
        active_exam_count: active_exam_count(&data.exam_problems),
        problem_count: data.problems.len(),
        graded_score_count: data
            .scores
            .iter()
            .filter(|s| s.status == SCORE_STATUS_GRADED)
            .count(),
        average_percentage: overall_average_percentage(&data.exam_problems, &data.scores),
    }
}
