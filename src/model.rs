use crate::sheets::{Entity, Row, SheetError, SheetRecord};
use rusqlite::types::Value;
use serde::Serialize;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_INACTIVE: &str = "inactive";
pub const EXAM_STATUS_PENDING: &str = "pending";
pub const SCORE_STATUS_GRADED: &str = "graded";
pub const NOT_SCHEDULED: &str = "Not scheduled";
pub const UNKNOWN_PROBLEM: &str = "Unknown Problem";
pub const UNKNOWN_STUDENT: &str = "Unknown Student";

pub const ATTENDANCE_STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

fn text(v: &str) -> Value {
    Value::Text(v.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub school: String,
    pub generation: String,
    pub enrollment_date: String,
    pub status: String,
}

impl Student {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

impl SheetRecord for Student {
    const ENTITY: Entity = Entity::Students;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError> {
        Ok(Self {
            id: row.id()?,
            name: row.text(1),
            school: row.text(2),
            generation: row.text(3),
            enrollment_date: row.text(4),
            status: row.text(5),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.name),
            text(&self.school),
            text(&self.generation),
            text(&self.enrollment_date),
            text(&self.status),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub school: String,
    pub year: String,
    pub semester: String,
    pub generation: String,
    pub schedule: String,
    pub status: String,
}

impl SheetRecord for Class {
    const ENTITY: Entity = Entity::Classes;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError> {
        Ok(Self {
            id: row.id()?,
            school: row.text(1),
            year: row.text(2),
            semester: row.text(3),
            generation: row.text(4),
            schedule: row.text(5),
            status: row.text(6),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.school),
            text(&self.year),
            text(&self.semester),
            text(&self.generation),
            text(&self.schedule),
            text(&self.status),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lecture {
    pub id: String,
    pub class_id: String,
    pub date: String,
    pub topic: String,
    pub status: String,
}

impl SheetRecord for Lecture {
    const ENTITY: Entity = Entity::Lectures;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError> {
        Ok(Self {
            id: row.id()?,
            class_id: row.text(1),
            date: row.text(2),
            topic: row.text(3),
            status: row.text(4),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.class_id),
            text(&self.date),
            text(&self.topic),
            text(&self.status),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub status: String,
}

impl SheetRecord for Enrollment {
    const ENTITY: Entity = Entity::Enrollments;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError> {
        Ok(Self {
            id: row.id()?,
            student_id: row.text(1),
            class_id: row.text(2),
            status: row.text(3),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.student_id),
            text(&self.class_id),
            text(&self.status),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub date: String,
    pub status: String,
}

impl SheetRecord for Attendance {
    const ENTITY: Entity = Entity::Attendance;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError> {
        Ok(Self {
            id: row.id()?,
            student_id: row.text(1),
            class_id: row.text(2),
            date: row.text(3),
            status: row.text(4),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.student_id),
            text(&self.class_id),
            text(&self.date),
            text(&self.status),
        ]
    }
}

/// An exam header. `class_id`, `date` and `status` are empty on rows written
/// before exam-level metadata existed; readers then fall back to the exam's
/// first problem row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub title: String,
    pub description: String,
    pub class_id: String,
    pub date: String,
    pub status: String,
}

impl SheetRecord for Exam {
    const ENTITY: Entity = Entity::Exams;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError> {
        Ok(Self {
            id: row.id()?,
            title: row.text(1),
            description: row.text(2),
            class_id: row.text(3),
            date: row.text(4),
            status: row.text(5),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.title),
            text(&self.description),
            text(&self.class_id),
            text(&self.date),
            text(&self.status),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub description: String,
}

impl SheetRecord for Problem {
    const ENTITY: Entity = Entity::Problems;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError> {
        Ok(Self {
            id: row.id()?,
            title: row.text(1),
            description: row.text(2),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![text(&self.id), text(&self.title), text(&self.description)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamProblem {
    pub id: String,
    pub exam_id: String,
    pub problem_id: String,
    pub max_score: f64,
    pub problem_number: i64,
    pub date: String,
    pub class_id: String,
    pub status: String,
}

impl SheetRecord for ExamProblem {
    const ENTITY: Entity = Entity::ExamProblems;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError> {
        Ok(Self {
            id: row.id()?,
            exam_id: row.text(1),
            problem_id: row.text(2),
            max_score: row.number(3)?,
            problem_number: row.integer(4)?,
            date: row.text(5),
            class_id: row.text(6),
            status: row.text(7),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.exam_id),
            text(&self.problem_id),
            Value::Real(self.max_score),
            Value::Integer(self.problem_number),
            text(&self.date),
            text(&self.class_id),
            text(&self.status),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub problem_id: String,
    pub score: f64,
    pub comment: String,
    pub date: String,
    pub status: String,
    pub last_updated: String,
}

impl Score {
    pub fn matches(&self, exam_id: &str, student_id: &str, problem_id: &str) -> bool {
        self.exam_id == exam_id && self.student_id == student_id && self.problem_id == problem_id
    }
}

impl SheetRecord for Score {
    const ENTITY: Entity = Entity::Scores;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError> {
        Ok(Self {
            id: row.id()?,
            exam_id: row.text(1),
            student_id: row.text(2),
            problem_id: row.text(3),
            score: row.number(4)?,
            comment: row.text(5),
            date: row.text(6),
            status: row.text(7),
            last_updated: row.text(8),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.exam_id),
            text(&self.student_id),
            text(&self.problem_id),
            Value::Real(self.score),
            text(&self.comment),
            text(&self.date),
            text(&self.status),
            text(&self.last_updated),
        ]
    }
}
