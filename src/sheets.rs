//! Sheet-style access to the workspace store.
//!
//! Every entity lives in a table with a fixed column order, mirroring the
//! spreadsheet the admin tool grew out of. Reads return positional
//! row-arrays which are then marshalled into typed records; writes append a
//! row or overwrite the row whose `id` matches.

use crate::model::{
    Attendance, Class, Enrollment, Exam, ExamProblem, Lecture, Problem, Score, Student,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Students,
    Classes,
    Lectures,
    Enrollments,
    Attendance,
    Exams,
    Problems,
    ExamProblems,
    Scores,
}

impl Entity {
    pub const ALL: [Entity; 9] = [
        Entity::Students,
        Entity::Classes,
        Entity::Lectures,
        Entity::Enrollments,
        Entity::Attendance,
        Entity::Exams,
        Entity::Problems,
        Entity::ExamProblems,
        Entity::Scores,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Entity::Students => "students",
            Entity::Classes => "classes",
            Entity::Lectures => "lectures",
            Entity::Enrollments => "enrollments",
            Entity::Attendance => "attendance",
            Entity::Exams => "exams",
            Entity::Problems => "problems",
            Entity::ExamProblems => "exam_problems",
            Entity::Scores => "scores",
        }
    }

    /// Column order is part of the sheet format; never reorder.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Entity::Students => &[
                "id",
                "name",
                "school",
                "generation",
                "enrollment_date",
                "status",
            ],
            Entity::Classes => &[
                "id",
                "school",
                "year",
                "semester",
                "generation",
                "schedule",
                "status",
            ],
            Entity::Lectures => &["id", "class_id", "date", "topic", "status"],
            Entity::Enrollments => &["id", "student_id", "class_id", "status"],
            Entity::Attendance => &["id", "student_id", "class_id", "date", "status"],
            Entity::Exams => &["id", "title", "description", "class_id", "date", "status"],
            Entity::Problems => &["id", "title", "description"],
            Entity::ExamProblems => &[
                "id",
                "exam_id",
                "problem_id",
                "max_score",
                "problem_number",
                "date",
                "class_id",
                "status",
            ],
            Entity::Scores => &[
                "id",
                "exam_id",
                "student_id",
                "problem_id",
                "score",
                "comment",
                "date",
                "status",
                "last_updated",
            ],
        }
    }

    pub fn parse(name: &str) -> Option<Entity> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "students" | "student" => Some(Entity::Students),
            "classes" | "class" => Some(Entity::Classes),
            "lectures" | "lecture" => Some(Entity::Lectures),
            "enrollments" | "enrollment" => Some(Entity::Enrollments),
            "attendance" => Some(Entity::Attendance),
            "exams" | "exam" => Some(Entity::Exams),
            "problems" | "problem" => Some(Entity::Problems),
            "examproblems" | "examproblem" => Some(Entity::ExamProblems),
            "scores" | "score" => Some(Entity::Scores),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("{sheet} row {row}: column {column} is not a number ({value:?})")]
    BadCell {
        sheet: &'static str,
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("{sheet} row {row}: missing id")]
    MissingId { sheet: &'static str, row: usize },
    #[error("{sheet}: unknown column {column}")]
    UnknownColumn { sheet: &'static str, column: String },
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

/// One positional row of a sheet, with enough context to report bad cells.
pub struct Row<'a> {
    entity: Entity,
    index: usize,
    cells: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn new(entity: Entity, index: usize, cells: &'a [Value]) -> Self {
        Self {
            entity,
            index,
            cells,
        }
    }

    /// Missing trailing cells read as empty.
    pub fn text(&self, col: usize) -> String {
        match self.cells.get(col) {
            Some(Value::Text(s)) => s.clone(),
            Some(Value::Integer(i)) => i.to_string(),
            Some(Value::Real(f)) => f.to_string(),
            Some(Value::Blob(b)) => String::from_utf8_lossy(b).to_string(),
            Some(Value::Null) | None => String::new(),
        }
    }

    pub fn id(&self) -> Result<String, SheetError> {
        let id = self.text(0).trim().to_string();
        if id.is_empty() {
            return Err(SheetError::MissingId {
                sheet: self.entity.table(),
                row: self.index,
            });
        }
        Ok(id)
    }

    pub fn number(&self, col: usize) -> Result<f64, SheetError> {
        match self.cells.get(col) {
            Some(Value::Integer(i)) => Ok(*i as f64),
            Some(Value::Real(f)) => Ok(*f),
            Some(Value::Null) | None => Ok(0.0),
            Some(_) => {
                let raw = self.text(col);
                let t = raw.trim();
                if t.is_empty() {
                    return Ok(0.0);
                }
                t.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| self.bad_cell(col, raw.clone()))
            }
        }
    }

    pub fn integer(&self, col: usize) -> Result<i64, SheetError> {
        let v = self.number(col)?;
        if v.fract() != 0.0 {
            return Err(self.bad_cell(col, self.text(col)));
        }
        Ok(v as i64)
    }

    fn bad_cell(&self, col: usize, value: String) -> SheetError {
        SheetError::BadCell {
            sheet: self.entity.table(),
            row: self.index,
            column: self.entity.columns().get(col).copied().unwrap_or("?"),
            value,
        }
    }
}

pub trait SheetRecord: Sized {
    const ENTITY: Entity;

    fn from_row(row: &Row<'_>) -> Result<Self, SheetError>;
    fn to_row(&self) -> Vec<Value>;
}

/// `loadList(entity)`: all rows of a sheet in insertion order.
pub fn load_list(conn: &Connection, entity: Entity) -> Result<Vec<Vec<Value>>, SheetError> {
    let cols = entity.columns();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY rowid",
        cols.join(", "),
        entity.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| {
            (0..cols.len())
                .map(|i| r.get::<_, Value>(i))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    debug!(sheet = entity.table(), rows = rows.len(), "sheet loaded");
    Ok(rows)
}

pub fn load_records<T: SheetRecord>(conn: &Connection) -> Result<Vec<T>, SheetError> {
    let rows = load_list(conn, T::ENTITY)?;
    rows.iter()
        .enumerate()
        .map(|(i, cells)| T::from_row(&Row::new(T::ENTITY, i, cells)))
        .collect()
}

pub fn append_row<T: SheetRecord>(conn: &Connection, record: &T) -> Result<(), SheetError> {
    let entity = T::ENTITY;
    let cols = entity.columns();
    let placeholders = vec!["?"; cols.len()].join(", ");
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        entity.table(),
        cols.join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(record.to_row()))?;
    Ok(())
}

/// Overwrites the row with the record's id. Returns false when no row matched.
pub fn update_row<T: SheetRecord>(conn: &Connection, record: &T) -> Result<bool, SheetError> {
    let entity = T::ENTITY;
    let cols = entity.columns();
    let assignments = cols[1..]
        .iter()
        .map(|c| format!("{} = ?", c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE {} SET {} WHERE id = ?", entity.table(), assignments);
    let mut values = record.to_row();
    let id = values.remove(0);
    values.push(id);
    let changed = conn.execute(&sql, params_from_iter(values))?;
    Ok(changed > 0)
}

pub fn delete_where(
    conn: &Connection,
    entity: Entity,
    column: &str,
    value: &str,
) -> Result<usize, SheetError> {
    if !entity.columns().contains(&column) {
        return Err(SheetError::UnknownColumn {
            sheet: entity.table(),
            column: column.to_string(),
        });
    }
    let sql = format!("DELETE FROM {} WHERE {} = ?", entity.table(), column);
    Ok(conn.execute(&sql, [value])?)
}

/// Row-array cell as JSON, for `sheets.load`.
pub fn cell_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::json!(i),
        Value::Real(f) => serde_json::json!(f),
        Value::Text(s) => serde_json::json!(s),
        Value::Blob(b) => serde_json::json!(String::from_utf8_lossy(b)),
    }
}

/// In-memory copy of every sheet for the selected workspace.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub students: Vec<Student>,
    pub classes: Vec<Class>,
    pub lectures: Vec<Lecture>,
    pub enrollments: Vec<Enrollment>,
    pub attendance: Vec<Attendance>,
    pub exams: Vec<Exam>,
    pub problems: Vec<Problem>,
    pub exam_problems: Vec<ExamProblem>,
    pub scores: Vec<Score>,
    /// Set when the score sheet failed to decode and `scores` is a stand-in.
    pub scores_degraded: bool,
}

/// Bulk load of every sheet. Any failure aborts the load, except scores,
/// which degrade to an empty list.
pub fn load_dataset(conn: &Connection) -> Result<Dataset, SheetError> {
    let (scores, scores_degraded) = match load_records::<Score>(conn) {
        Ok(v) => (v, false),
        Err(e) => {
            warn!(error = %e, "score sheet failed to load; continuing with no scores");
            (Vec::new(), true)
        }
    };
    Ok(Dataset {
        students: load_records(conn)?,
        classes: load_records(conn)?,
        lectures: load_records(conn)?,
        enrollments: load_records(conn)?,
        attendance: load_records(conn)?,
        exams: load_records(conn)?,
        problems: load_records(conn)?,
        exam_problems: load_records(conn)?,
        scores,
        scores_degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn mem_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    fn student(id: &str, name: &str) -> Student {
        Student {
            id: id.to_string(),
            name: name.to_string(),
            school: "North".to_string(),
            generation: "12".to_string(),
            enrollment_date: "2024-03-02".to_string(),
            status: "active".to_string(),
        }
    }

    #[test]
    fn load_list_returns_positional_rows_in_insert_order() {
        let conn = mem_db();
        append_row(&conn, &student("s2", "Bo")).expect("append");
        append_row(&conn, &student("s1", "Al")).expect("append");

        let rows = load_list(&conn, Entity::Students).expect("load");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), Entity::Students.columns().len());
        assert_eq!(rows[0][0], Value::Text("s2".to_string()));
        assert_eq!(rows[1][1], Value::Text("Al".to_string()));
    }

    #[test]
    fn update_row_overwrites_by_id_and_keeps_position() {
        let conn = mem_db();
        append_row(&conn, &student("s1", "Al")).expect("append");
        append_row(&conn, &student("s2", "Bo")).expect("append");

        let mut s = student("s1", "Alice");
        s.status = "inactive".to_string();
        assert!(update_row(&conn, &s).expect("update"));
        assert!(!update_row(&conn, &student("zz", "Nobody")).expect("update"));

        let all: Vec<Student> = load_records(&conn).expect("records");
        assert_eq!(all[0], s);
        assert_eq!(all[1].name, "Bo");
    }

    #[test]
    fn numeric_cells_accept_text_and_reject_garbage() {
        let cells = vec![
            Value::Text("ep1".to_string()),
            Value::Text("e1".to_string()),
            Value::Text("p1".to_string()),
            Value::Text(" 12.5 ".to_string()),
            Value::Text("x".to_string()),
        ];
        let row = Row::new(Entity::ExamProblems, 3, &cells);
        assert_eq!(row.number(3).expect("numeric text"), 12.5);
        assert_eq!(row.number(7).expect("missing cell"), 0.0);
        assert_eq!(row.text(6), "");
        match row.integer(4) {
            Err(SheetError::BadCell { column, row, .. }) => {
                assert_eq!(column, "problem_number");
                assert_eq!(row, 3);
            }
            other => panic!("expected bad cell, got {other:?}"),
        }
    }

    #[test]
    fn bad_score_sheet_degrades_to_empty_but_other_sheets_propagate() {
        let conn = mem_db();
        append_row(&conn, &student("s1", "Al")).expect("append");
        conn.execute(
            "INSERT INTO scores(id, exam_id, student_id, problem_id, score)
             VALUES('sc1', 'e1', 's1', 'p1', 'not a number')",
            [],
        )
        .expect("insert bad score");

        let data = load_dataset(&conn).expect("dataset");
        assert!(data.scores.is_empty());
        assert!(data.scores_degraded);
        assert_eq!(data.students.len(), 1);

        conn.execute(
            "INSERT INTO exam_problems(id, exam_id, problem_id, max_score, problem_number)
             VALUES('ep1', 'e1', 'p1', 'ten', 1)",
            [],
        )
        .expect("insert bad exam problem");
        assert!(matches!(
            load_dataset(&conn),
            Err(SheetError::BadCell { sheet: "exam_problems", .. })
        ));
    }

    #[test]
    fn rows_without_id_are_rejected() {
        let cells = vec![Value::Null, Value::Text("Al".to_string())];
        let row = Row::new(Entity::Students, 0, &cells);
        assert!(matches!(
            Student::from_row(&row),
            Err(SheetError::MissingId { .. })
        ));
    }

    #[test]
    fn entity_names_parse_loosely() {
        assert_eq!(Entity::parse("exam_problems"), Some(Entity::ExamProblems));
        assert_eq!(Entity::parse("examProblems"), Some(Entity::ExamProblems));
        assert_eq!(Entity::parse("Scores"), Some(Entity::Scores));
        assert_eq!(Entity::parse("grades"), None);
    }
}
