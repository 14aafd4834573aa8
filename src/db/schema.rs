//! Database schema and version tracking
//!
//! `schema_version` holds a single row. A database without that row is
//! fresh and gets the full schema; an older version is migrated forward in
//! one transaction.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{GateError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Bring the database up to `SCHEMA_VERSION`
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    match stored_version(conn)? {
        None => {
            info!("Creating progression schema v{}", SCHEMA_VERSION);
            let tx = conn.unchecked_transaction()?;
            create_tables(&tx)?;
            write_version(&tx, SCHEMA_VERSION)?;
            tx.commit()?;
        }
        Some(version) if version < SCHEMA_VERSION => {
            info!("Migrating progression schema v{} -> v{}", version, SCHEMA_VERSION);
            let tx = conn.unchecked_transaction()?;
            migrate_schema(&tx, version)?;
            tx.commit()?;
        }
        Some(version) if version > SCHEMA_VERSION => {
            return Err(GateError::Database(format!(
                "schema v{} is newer than this build (v{})",
                version, SCHEMA_VERSION
            )));
        }
        Some(version) => debug!("Schema up to date (v{})", version),
    }

    Ok(())
}

/// Recorded version, `None` for a fresh database
fn stored_version(conn: &Connection) -> Result<Option<i32>> {
    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(version)
}

fn write_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(ACTIVATION_SCHEMA)
        .map_err(|e| GateError::Database(format!("Failed to create activation tables: {}", e)))?;

    conn.execute_batch(LEARNER_SCHEMA)
        .map_err(|e| GateError::Database(format!("Failed to create learner tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| GateError::Database(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
    if from_version < 2 {
        // v2: manual early release of the delayed assessment
        conn.execute_batch("ALTER TABLE cohort_activations ADD COLUMN released_at TEXT;")
            .map_err(|e| GateError::Database(format!("Migration to v2 failed: {}", e)))?;
    }

    // Tables added since `from_version`; existing ones are left alone
    create_tables(conn)?;
    write_version(conn, SCHEMA_VERSION)
}

/// Activation flags, written only by the admin surface
const ACTIVATION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cohort_activations (
    cohort INTEGER PRIMARY KEY NOT NULL,
    activated INTEGER NOT NULL DEFAULT 0,
    -- RFC 3339 UTC instants
    activated_at TEXT,
    released_at TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS identifier_activations (
    cohort INTEGER NOT NULL,
    identifier TEXT NOT NULL,
    activated INTEGER NOT NULL DEFAULT 0,
    activated_at TEXT,
    PRIMARY KEY (cohort, identifier)
);
"#;

/// Learner accounts and the progress ledger
const LEARNER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS learners (
    id TEXT PRIMARY KEY NOT NULL,
    cohort INTEGER NOT NULL,
    -- Bound once, never reassigned
    identifier TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL,
    xp INTEGER NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 1,
    intro_completed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS progress (
    learner_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'not_started',
    score INTEGER,
    time_spent_minutes INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (learner_id, lesson_id)
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_identifier_activations_cohort ON identifier_activations(cohort, activated);
CREATE INDEX IF NOT EXISTS idx_learners_cohort ON learners(cohort);
CREATE INDEX IF NOT EXISTS idx_progress_completed ON progress(learner_id, completed_at);
"#;
