//! Progress ledger rows

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::learners::update_learner;
use super::{format_ts, parse_ts};
use crate::error::Result;
use crate::model::{Learner, ProgressRecord, ProgressStatus};

/// Raw progress row before status and timestamp parsing
struct ProgressRow {
    learner_id: String,
    lesson_id: String,
    status: String,
    score: Option<u32>,
    time_spent_minutes: u32,
    completed_at: Option<String>,
}

impl ProgressRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            learner_id: row.get("learner_id")?,
            lesson_id: row.get("lesson_id")?,
            status: row.get("status")?,
            score: row.get("score")?,
            time_spent_minutes: row.get("time_spent_minutes")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn into_record(self) -> Result<ProgressRecord> {
        Ok(ProgressRecord {
            learner_id: self.learner_id,
            lesson_id: self.lesson_id,
            status: self.status.parse::<ProgressStatus>()?,
            score: self.score,
            time_spent_minutes: self.time_spent_minutes,
            completed_at: parse_ts(self.completed_at)?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT learner_id, lesson_id, status, score, time_spent_minutes, completed_at FROM progress";

pub fn list_for_learner(conn: &Connection, learner_id: &str) -> Result<Vec<ProgressRecord>> {
    let mut stmt = conn.prepare(&format!("{} WHERE learner_id = ? ORDER BY lesson_id", SELECT_COLUMNS))?;
    let rows = stmt
        .query_map(params![learner_id], |row| ProgressRow::from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(ProgressRow::into_record).collect()
}

pub fn get_record(conn: &Connection, learner_id: &str, lesson_id: &str) -> Result<Option<ProgressRecord>> {
    let row = conn
        .query_row(
            &format!("{} WHERE learner_id = ? AND lesson_id = ?", SELECT_COLUMNS),
            params![learner_id, lesson_id],
            |row| ProgressRow::from_row(row),
        )
        .optional()?;
    row.map(ProgressRow::into_record).transpose()
}

/// Insert or overwrite in place; the composite key keeps one row per pair
pub fn upsert_record(conn: &Connection, record: &ProgressRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO progress (learner_id, lesson_id, status, score, time_spent_minutes, completed_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, datetime('now'))
        ON CONFLICT(learner_id, lesson_id) DO UPDATE SET
            status = excluded.status,
            score = excluded.score,
            time_spent_minutes = excluded.time_spent_minutes,
            completed_at = excluded.completed_at,
            updated_at = excluded.updated_at
        "#,
        params![
            record.learner_id,
            record.lesson_id,
            record.status.as_str(),
            record.score,
            record.time_spent_minutes,
            record.completed_at.map(format_ts),
        ],
    )?;
    Ok(())
}

/// Completion record and learner award in one transaction
pub fn commit_completion(conn: &mut Connection, record: &ProgressRecord, learner: &Learner) -> Result<()> {
    let tx = conn.transaction()?;
    upsert_record(&tx, record)?;
    update_learner(&tx, learner)?;
    tx.commit()?;
    Ok(())
}

pub fn count_records(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM progress", [], |row| row.get(0))?;
    Ok(count as u64)
}
