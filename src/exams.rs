use crate::model::{
    Exam, ExamProblem, Score, Student, EXAM_STATUS_PENDING, NOT_SCHEDULED, SCORE_STATUS_GRADED,
    STATUS_ACTIVE, UNKNOWN_PROBLEM, UNKNOWN_STUDENT,
};
use crate::sheets::Dataset;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Which students count as sitting an exam, beyond those who already have a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RosterPolicy {
    /// Active enrollments in the exam's class.
    #[default]
    Enrollment,
    /// Every student whose own status is active.
    ActiveStatus,
}

impl RosterPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "enrollment" => Some(RosterPolicy::Enrollment),
            "activeStatus" | "active_status" => Some(RosterPolicy::ActiveStatus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RosterPolicy::Enrollment => "enrollment",
            RosterPolicy::ActiveStatus => "activeStatus",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamMeta {
    pub class_id: String,
    pub date: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamProblemView {
    pub exam_problem_id: String,
    pub problem_id: String,
    pub problem_number: i64,
    pub max_score: f64,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCell {
    pub score_id: String,
    pub score: f64,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student_id: String,
    pub name: String,
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: i64,
    /// Keyed by problem id.
    pub scores: BTreeMap<String, ScoreCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDetail {
    pub exam_id: String,
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub meta: ExamMeta,
    pub problems: Vec<ExamProblemView>,
    pub students: Vec<StudentResult>,
    pub max_score: f64,
    pub average_percentage: i64,
}

/// Rows of one exam ordered by `problem_number`; ties keep sheet order.
pub fn exam_problems_sorted<'a>(rows: &'a [ExamProblem], exam_id: &str) -> Vec<&'a ExamProblem> {
    let mut out: Vec<&ExamProblem> = rows.iter().filter(|ep| ep.exam_id == exam_id).collect();
    out.sort_by_key(|ep| ep.problem_number);
    out
}

pub fn exam_max_score(sorted: &[&ExamProblem]) -> f64 {
    sorted.iter().map(|ep| ep.max_score).sum()
}

/// Exam-level values win; legacy exams take them from their first problem row.
pub fn exam_meta(exam: &Exam, sorted: &[&ExamProblem]) -> ExamMeta {
    let first = sorted.first();
    let pick = |own: &str, from_row: Option<&str>, fallback: &str| -> String {
        if !own.trim().is_empty() {
            return own.to_string();
        }
        match from_row {
            Some(v) if !v.trim().is_empty() => v.to_string(),
            _ => fallback.to_string(),
        }
    };
    ExamMeta {
        class_id: pick(
            &exam.class_id,
            first.map(|ep| ep.class_id.as_str()),
            NOT_SCHEDULED,
        ),
        date: pick(&exam.date, first.map(|ep| ep.date.as_str()), NOT_SCHEDULED),
        status: pick(
            &exam.status,
            first.map(|ep| ep.status.as_str()),
            EXAM_STATUS_PENDING,
        ),
    }
}

/// `round(total / max * 100)`; a zero max yields 0. Not clamped.
pub fn percentage(total: f64, max: f64) -> i64 {
    if max == 0.0 {
        return 0;
    }
    (total / max * 100.0).round() as i64
}

fn roster<'a>(
    data: &'a Dataset,
    exam_id: &str,
    meta: &ExamMeta,
    policy: RosterPolicy,
) -> Vec<(String, Option<&'a Student>)> {
    let scored: HashSet<&str> = data
        .scores
        .iter()
        .filter(|s| s.exam_id == exam_id)
        .map(|s| s.student_id.as_str())
        .collect();

    let class_id = meta.class_id.trim();
    let has_class = !class_id.is_empty() && class_id != NOT_SCHEDULED;
    let enrolled: Option<HashSet<&str>> = match policy {
        RosterPolicy::Enrollment if has_class => Some(
            data.enrollments
                .iter()
                .filter(|e| e.class_id == class_id && e.status == STATUS_ACTIVE)
                .map(|e| e.student_id.as_str())
                .collect(),
        ),
        _ => None,
    };

    let mut out: Vec<(String, Option<&Student>)> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for s in &data.students {
        let included = scored.contains(s.id.as_str())
            || match &enrolled {
                Some(ids) => ids.contains(s.id.as_str()),
                None => s.is_active(),
            };
        if included && seen.insert(s.id.as_str()) {
            out.push((s.id.clone(), Some(s)));
        }
    }
    // Scores can outlive their student row.
    for sc in data.scores.iter().filter(|s| s.exam_id == exam_id) {
        if seen.insert(sc.student_id.as_str()) {
            out.push((sc.student_id.clone(), None));
        }
    }
    out
}

/// Per-exam view joining problems, roster and scores. `None` for an unknown exam.
pub fn exam_detail(data: &Dataset, exam_id: &str, policy: RosterPolicy) -> Option<ExamDetail> {
    let exam = data.exams.iter().find(|e| e.id == exam_id)?;
    let sorted = exam_problems_sorted(&data.exam_problems, exam_id);
    let meta = exam_meta(exam, &sorted);
    let max_score = exam_max_score(&sorted);

    let problems: Vec<ExamProblemView> = sorted
        .iter()
        .map(|ep| {
            let problem = data.problems.iter().find(|p| p.id == ep.problem_id);
            ExamProblemView {
                exam_problem_id: ep.id.clone(),
                problem_id: ep.problem_id.clone(),
                problem_number: ep.problem_number,
                max_score: ep.max_score,
                title: problem
                    .map(|p| p.title.clone())
                    .unwrap_or_else(|| UNKNOWN_PROBLEM.to_string()),
                description: problem.map(|p| p.description.clone()).unwrap_or_default(),
            }
        })
        .collect();

    let students: Vec<StudentResult> = roster(data, exam_id, &meta, policy)
        .into_iter()
        .map(|(student_id, student)| {
            let mut total_score = 0.0;
            let mut scores = BTreeMap::new();
            for sc in data
                .scores
                .iter()
                .filter(|s| s.exam_id == exam_id && s.student_id == student_id)
            {
                total_score += sc.score;
                scores.insert(
                    sc.problem_id.clone(),
                    ScoreCell {
                        score_id: sc.id.clone(),
                        score: sc.score,
                        comment: sc.comment.clone(),
                    },
                );
            }
            StudentResult {
                name: student
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| UNKNOWN_STUDENT.to_string()),
                student_id,
                total_score,
                max_score,
                percentage: percentage(total_score, max_score),
                scores,
            }
        })
        .collect();

    let average_percentage = if students.is_empty() {
        0
    } else {
        let sum: i64 = students.iter().map(|s| s.percentage).sum();
        (sum as f64 / students.len() as f64).round() as i64
    };

    Some(ExamDetail {
        exam_id: exam.id.clone(),
        title: exam.title.clone(),
        description: exam.description.clone(),
        meta,
        problems,
        students,
        max_score,
        average_percentage,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEdit {
    pub student_id: String,
    pub problem_id: String,
    pub score: f64,
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub inserted: Vec<Score>,
    pub updated: Vec<Score>,
    pub unchanged: usize,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty()
    }
}

/// Merge edits into `scores` keyed on (exam, student, problem).
///
/// Matches are overwritten in place (score, comment, last_updated); status and
/// date are kept. Unmatched edits append a new graded score with an id from
/// `next_id`. An edit that changes nothing is skipped, so replaying a batch
/// leaves the set untouched. The outcome holds the final state of every
/// written record.
pub fn reconcile_scores(
    scores: &mut Vec<Score>,
    exam_id: &str,
    edits: &[ScoreEdit],
    now: DateTime<Utc>,
    mut next_id: impl FnMut() -> String,
) -> ReconcileOutcome {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let today = now.format("%Y-%m-%d").to_string();
    let existing_len = scores.len();
    let mut touched: Vec<usize> = Vec::new();
    let mut unchanged = 0;

    for edit in edits {
        let found = scores
            .iter()
            .position(|s| s.matches(exam_id, &edit.student_id, &edit.problem_id));
        match found {
            Some(i) => {
                let s = &mut scores[i];
                if s.score == edit.score && s.comment == edit.comment {
                    unchanged += 1;
                    continue;
                }
                s.score = edit.score;
                s.comment = edit.comment.clone();
                s.last_updated = stamp.clone();
                if !touched.contains(&i) {
                    touched.push(i);
                }
            }
            None => {
                scores.push(Score {
                    id: next_id(),
                    exam_id: exam_id.to_string(),
                    student_id: edit.student_id.clone(),
                    problem_id: edit.problem_id.clone(),
                    score: edit.score,
                    comment: edit.comment.clone(),
                    date: today.clone(),
                    status: SCORE_STATUS_GRADED.to_string(),
                    last_updated: stamp.clone(),
                });
            }
        }
    }

    ReconcileOutcome {
        inserted: scores[existing_len..].to_vec(),
        updated: touched
            .into_iter()
            .filter(|i| *i < existing_len)
            .map(|i| scores[i].clone())
            .collect(),
        unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Enrollment, Problem};
    use chrono::TimeZone;

    fn exam(id: &str) -> Exam {
        Exam {
            id: id.to_string(),
            title: format!("Exam {id}"),
            description: String::new(),
            class_id: String::new(),
            date: String::new(),
            status: String::new(),
        }
    }

    fn ep(id: &str, exam_id: &str, problem_id: &str, max: f64, number: i64) -> ExamProblem {
        ExamProblem {
            id: id.to_string(),
            exam_id: exam_id.to_string(),
            problem_id: problem_id.to_string(),
            max_score: max,
            problem_number: number,
            date: "2025-05-01".to_string(),
            class_id: "c1".to_string(),
            status: "active".to_string(),
        }
    }

    fn problem(id: &str) -> Problem {
        Problem {
            id: id.to_string(),
            title: format!("Problem {id}"),
            description: "desc".to_string(),
        }
    }

    fn student(id: &str, status: &str) -> Student {
        Student {
            id: id.to_string(),
            name: format!("Student {id}"),
            school: String::new(),
            generation: String::new(),
            enrollment_date: String::new(),
            status: status.to_string(),
        }
    }

    fn score(id: &str, exam_id: &str, student_id: &str, problem_id: &str, v: f64) -> Score {
        Score {
            id: id.to_string(),
            exam_id: exam_id.to_string(),
            student_id: student_id.to_string(),
            problem_id: problem_id.to_string(),
            score: v,
            comment: String::new(),
            date: "2025-05-01".to_string(),
            status: "graded".to_string(),
            last_updated: "2025-05-01T09:00:00.000Z".to_string(),
        }
    }

    fn enrollment(student_id: &str, class_id: &str, status: &str) -> Enrollment {
        Enrollment {
            id: format!("en-{student_id}-{class_id}"),
            student_id: student_id.to_string(),
            class_id: class_id.to_string(),
            status: status.to_string(),
        }
    }

    fn edit(student_id: &str, problem_id: &str, v: f64, comment: &str) -> ScoreEdit {
        ScoreEdit {
            student_id: student_id.to_string(),
            problem_id: problem_id.to_string(),
            score: v,
            comment: comment.to_string(),
        }
    }

    fn base() -> Dataset {
        Dataset {
            students: vec![student("s1", "active")],
            exams: vec![exam("E")],
            problems: vec![problem("P1"), problem("P2")],
            exam_problems: vec![ep("ep2", "E", "P2", 15.0, 2), ep("ep1", "E", "P1", 10.0, 1)],
            enrollments: vec![enrollment("s1", "c1", "active")],
            scores: vec![score("1", "E", "s1", "P1", 8.0), score("2", "E", "s1", "P2", 12.0)],
            ..Dataset::default()
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, 30, 0).unwrap()
    }

    #[test]
    fn totals_and_percentage_for_two_problem_exam() {
        let detail = exam_detail(&base(), "E", RosterPolicy::Enrollment).expect("exam");
        assert_eq!(detail.max_score, 25.0);
        assert_eq!(
            detail.problems.iter().map(|p| p.problem_id.as_str()).collect::<Vec<_>>(),
            vec!["P1", "P2"]
        );
        let s1 = &detail.students[0];
        assert_eq!(s1.total_score, 20.0);
        assert_eq!(s1.max_score, 25.0);
        assert_eq!(s1.percentage, 80);
        assert_eq!(s1.scores["P2"].score_id, "2");
        assert_eq!(detail.average_percentage, 80);
    }

    #[test]
    fn unknown_exam_is_none() {
        assert!(exam_detail(&base(), "nope", RosterPolicy::Enrollment).is_none());
    }

    #[test]
    fn exam_without_problems_scores_zero_everywhere() {
        let mut data = base();
        data.exams.push(exam("Empty"));
        data.students.push(student("s2", "active"));
        data.scores.push(score("9", "Empty", "s2", "P1", 4.0));

        let detail = exam_detail(&data, "Empty", RosterPolicy::Enrollment).expect("exam");
        assert!(detail.problems.is_empty());
        assert_eq!(detail.meta.class_id, NOT_SCHEDULED);
        assert_eq!(detail.meta.date, NOT_SCHEDULED);
        assert_eq!(detail.meta.status, EXAM_STATUS_PENDING);
        assert!(!detail.students.is_empty());
        for s in &detail.students {
            assert_eq!(s.max_score, 0.0);
            assert_eq!(s.percentage, 0);
        }
        assert_eq!(detail.average_percentage, 0);
    }

    #[test]
    fn overscored_percentage_is_not_clamped() {
        let mut data = base();
        data.scores[0].score = 30.0;
        let detail = exam_detail(&data, "E", RosterPolicy::Enrollment).expect("exam");
        assert_eq!(detail.students[0].percentage, 168);
    }

    #[test]
    fn missing_problem_gets_placeholder() {
        let mut data = base();
        data.problems.retain(|p| p.id != "P2");
        let detail = exam_detail(&data, "E", RosterPolicy::Enrollment).expect("exam");
        assert_eq!(detail.problems[1].title, UNKNOWN_PROBLEM);
        assert_eq!(detail.problems[1].description, "");
        assert_eq!(detail.problems[0].title, "Problem P1");
    }

    #[test]
    fn equal_problem_numbers_keep_sheet_order() {
        let rows = vec![
            ep("a", "E", "P9", 1.0, 2),
            ep("b", "E", "P8", 1.0, 1),
            ep("c", "E", "P7", 1.0, 1),
            ep("d", "X", "P6", 1.0, 0),
        ];
        let sorted = exam_problems_sorted(&rows, "E");
        let ids: Vec<&str> = sorted.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn exam_level_metadata_wins_over_first_row() {
        let mut data = base();
        data.exams[0].class_id = "c9".to_string();
        data.exams[0].status = "completed".to_string();
        let detail = exam_detail(&data, "E", RosterPolicy::Enrollment).expect("exam");
        assert_eq!(detail.meta.class_id, "c9");
        assert_eq!(detail.meta.status, "completed");
        assert_eq!(detail.meta.date, "2025-05-01");
    }

    #[test]
    fn enrollment_roster_skips_active_students_of_other_classes() {
        let mut data = base();
        data.students.push(student("s2", "active"));
        data.students.push(student("s3", "inactive"));
        data.enrollments.push(enrollment("s2", "c2", "active"));
        data.enrollments.push(enrollment("s3", "c1", "active"));

        let detail = exam_detail(&data, "E", RosterPolicy::Enrollment).expect("exam");
        let ids: Vec<&str> = detail.students.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s3"]);

        let detail = exam_detail(&data, "E", RosterPolicy::ActiveStatus).expect("exam");
        let ids: Vec<&str> = detail.students.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[test]
    fn scored_students_stay_on_roster_even_if_inactive_or_deleted() {
        let mut data = base();
        data.students[0].status = "inactive".to_string();
        data.enrollments.clear();
        data.scores.push(score("7", "E", "ghost", "P1", 5.0));

        let detail = exam_detail(&data, "E", RosterPolicy::ActiveStatus).expect("exam");
        assert_eq!(detail.students.len(), 2);
        assert_eq!(detail.students[1].name, UNKNOWN_STUDENT);
        assert_eq!(detail.students[1].percentage, 20);
        assert_eq!(detail.average_percentage, 50);
    }

    #[test]
    fn aggregation_does_not_touch_inputs() {
        let data = base();
        let before = data.clone();
        let _ = exam_detail(&data, "E", RosterPolicy::Enrollment);
        assert_eq!(data.scores, before.scores);
        assert_eq!(data.exam_problems, before.exam_problems);
    }

    #[test]
    fn update_keeps_id_date_status_and_stamps_time() {
        let mut scores = base().scores;
        let out = reconcile_scores(
            &mut scores,
            "E",
            &[edit("s1", "P1", 9.0, "redo")],
            at(10),
            || panic!("no new id expected"),
        );
        assert!(out.inserted.is_empty());
        assert_eq!(out.updated.len(), 1);
        let s = &scores[0];
        assert_eq!(s.id, "1");
        assert_eq!(s.score, 9.0);
        assert_eq!(s.comment, "redo");
        assert_eq!(s.date, "2025-05-01");
        assert_eq!(s.status, "graded");
        assert_eq!(s.last_updated, "2025-06-02T10:30:00.000Z");
        assert_eq!(out.updated[0], *s);
    }

    #[test]
    fn unmatched_edit_inserts_graded_score() {
        let mut scores = base().scores;
        let out = reconcile_scores(
            &mut scores,
            "E",
            &[edit("s2", "P1", 6.5, "")],
            at(8),
            || "new-1".to_string(),
        );
        assert_eq!(scores.len(), 3);
        assert_eq!(out.inserted.len(), 1);
        let s = &out.inserted[0];
        assert_eq!(s.id, "new-1");
        assert_eq!(s.exam_id, "E");
        assert_eq!(s.status, SCORE_STATUS_GRADED);
        assert_eq!(s.date, "2025-06-02");
    }

    #[test]
    fn replaying_a_batch_is_idempotent() {
        let mut scores = base().scores;
        let batch = [edit("s1", "P1", 9.0, "redo"), edit("s2", "P2", 3.0, "late")];
        let mut n = 0;
        let mut ids = || {
            n += 1;
            format!("gen-{n}")
        };
        reconcile_scores(&mut scores, "E", &batch, at(9), &mut ids);
        let after_first = scores.clone();
        let second = reconcile_scores(&mut scores, "E", &batch, at(11), &mut ids);
        assert_eq!(scores, after_first);
        assert!(second.is_empty());
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn duplicate_keys_in_one_batch_collapse_last_wins() {
        let mut scores = Vec::new();
        let out = reconcile_scores(
            &mut scores,
            "E",
            &[edit("s1", "P1", 2.0, "a"), edit("s1", "P1", 4.0, "b")],
            at(9),
            || "only".to_string(),
        );
        assert_eq!(scores.len(), 1);
        assert_eq!(out.inserted.len(), 1);
        assert_eq!(out.inserted[0].score, 4.0);
        assert!(out.updated.is_empty());
    }

    #[test]
    fn edits_only_match_within_target_exam() {
        let mut scores = vec![score("1", "Other", "s1", "P1", 8.0)];
        let out = reconcile_scores(
            &mut scores,
            "E",
            &[edit("s1", "P1", 9.0, "")],
            at(9),
            || "fresh".to_string(),
        );
        assert_eq!(out.inserted.len(), 1);
        assert_eq!(scores[0].score, 8.0);
    }

    #[test]
    fn roster_policy_names() {
        assert_eq!(RosterPolicy::parse("activeStatus"), Some(RosterPolicy::ActiveStatus));
        assert_eq!(RosterPolicy::parse("enrollment"), Some(RosterPolicy::Enrollment));
        assert_eq!(RosterPolicy::parse("x"), None);
        assert_eq!(RosterPolicy::default().as_str(), "enrollment");
    }
}
