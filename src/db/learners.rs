//! Learner accounts

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::error::{GateError, Result};
use crate::model::{LearningPath, Learner};

struct LearnerRow {
    id: String,
    cohort: u32,
    identifier: String,
    path: String,
    xp: u32,
    level: u32,
    intro_completed: bool,
}

impl LearnerRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            cohort: row.get("cohort")?,
            identifier: row.get("identifier")?,
            path: row.get("path")?,
            xp: row.get("xp")?,
            level: row.get("level")?,
            intro_completed: row.get("intro_completed")?,
        })
    }

    fn into_learner(self) -> Result<Learner> {
        Ok(Learner {
            id: self.id,
            cohort: self.cohort,
            identifier: self.identifier,
            path: self.path.parse::<LearningPath>()?,
            xp: self.xp,
            level: self.level,
            intro_completed: self.intro_completed,
        })
    }
}

/// Bind a roster identifier to a new learner account
pub fn insert_learner(conn: &mut Connection, learner: &Learner) -> Result<()> {
    let tx = conn.transaction()?;

    let bound_to: Option<String> = tx
        .query_row(
            "SELECT id FROM learners WHERE identifier = ?",
            params![learner.identifier],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(learner_id) = bound_to {
        return Err(GateError::IdentifierAlreadyBound { learner_id });
    }

    tx.execute(
        r#"
        INSERT INTO learners (id, cohort, identifier, path, xp, level, intro_completed)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            learner.id,
            learner.cohort,
            learner.identifier,
            learner.path.to_string(),
            learner.xp,
            learner.level,
            learner.intro_completed,
        ],
    )?;
    tx.commit()?;

    info!("Registered learner {} in cohort {}", learner.id, learner.cohort);
    Ok(())
}

pub fn get_learner(conn: &Connection, id: &str) -> Result<Option<Learner>> {
    let row = conn
        .query_row(
            "SELECT id, cohort, identifier, path, xp, level, intro_completed FROM learners WHERE id = ?",
            params![id],
            |row| LearnerRow::from_row(row),
        )
        .optional()?;
    row.map(LearnerRow::into_learner).transpose()
}

/// Persist mutable learner fields; cohort and identifier are never rewritten
pub fn update_learner(conn: &Connection, learner: &Learner) -> Result<()> {
    let changed = conn.execute(
        "UPDATE learners SET path = ?, xp = ?, level = ?, intro_completed = ? WHERE id = ?",
        params![
            learner.path.to_string(),
            learner.xp,
            learner.level,
            learner.intro_completed,
            learner.id,
        ],
    )?;
    if changed == 0 {
        return Err(GateError::NotFound(format!("learner {}", learner.id)));
    }
    Ok(())
}

pub fn count_learners(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM learners", [], |row| row.get(0))?;
    Ok(count as u64)
}
