//! SQLite persistence for activation state, learners and progress
//!
//! ## Tables
//!
//! - `cohort_activations` - cohort flag, activation instant, manual release
//! - `identifier_activations` - per (cohort, identifier) flag
//! - `learners` - accounts; `identifier` is UNIQUE
//! - `progress` - ledger keyed by (learner_id, lesson_id), written by upsert
//!
//! Timestamps are stored as RFC 3339 text in UTC.

pub mod activations;
pub mod learners;
pub mod progress;
pub mod schema;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::accounts::LearnerStore;
use crate::activation::{ActivationBatch, ActivationStore, BatchOutcome, CohortActivation, IdentifierActivation};
use crate::error::{GateError, Result};
use crate::model::{Learner, ProgressRecord};
use crate::progress::{CompletionWriter, ProgressLedger};

/// SQLite database backing the activation, learner and progress stores
pub struct GateDb {
    conn: Mutex<Connection>,
}

impl GateDb {
    /// Open or create the database under `storage_dir`
    pub fn open(storage_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_dir)?;
        let db_path = storage_dir.join("progression.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| GateError::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL mode: readers proceed during admin write transactions
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| GateError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| GateError::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Create or migrate tables before the handle is shared
    fn init_schema(&self) -> Result<()> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read (or single-statement write) under the connection lock
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    pub fn stats(&self) -> Result<DbStats> {
        self.with_conn(|conn| {
            let (active_cohorts, active_identifiers) = activations::count_active(conn)?;
            Ok(DbStats {
                active_cohorts,
                active_identifiers,
                learners: learners::count_learners(conn)?,
                progress_records: progress::count_records(conn)?,
            })
        })
    }
}

impl ActivationStore for GateDb {
    fn cohort(&self, number: u32) -> Result<CohortActivation> {
        self.with_conn(|conn| activations::get_cohort(conn, number))
    }

    fn identifier(&self, number: u32, identifier: &str) -> Result<Option<IdentifierActivation>> {
        self.with_conn(|conn| activations::get_identifier(conn, number, identifier))
    }

    fn active_identifiers(&self, number: u32) -> Result<Vec<String>> {
        self.with_conn(|conn| activations::list_active_identifiers(conn, number))
    }

    fn set_cohort(&self, number: u32, state: &CohortActivation) -> Result<()> {
        self.with_conn(|conn| activations::put_cohort(conn, number, state))
    }

    fn apply_activation(&self, batch: &ActivationBatch) -> Result<BatchOutcome> {
        self.with_conn_mut(|conn| activations::apply_batch(conn, batch))
    }
}

impl LearnerStore for GateDb {
    fn register_learner(&self, learner: &Learner) -> Result<()> {
        self.with_conn_mut(|conn| learners::insert_learner(conn, learner))
    }

    fn get_learner(&self, id: &str) -> Result<Option<Learner>> {
        self.with_conn(|conn| learners::get_learner(conn, id))
    }

    fn save_learner(&self, learner: &Learner) -> Result<()> {
        self.with_conn(|conn| learners::update_learner(conn, learner))
    }
}

impl ProgressLedger for GateDb {
    fn records_for(&self, learner_id: &str) -> Result<Vec<ProgressRecord>> {
        self.with_conn(|conn| progress::list_for_learner(conn, learner_id))
    }

    fn get(&self, learner_id: &str, lesson_id: &str) -> Result<Option<ProgressRecord>> {
        self.with_conn(|conn| progress::get_record(conn, learner_id, lesson_id))
    }

    fn upsert(&self, record: &ProgressRecord) -> Result<()> {
        self.with_conn(|conn| progress::upsert_record(conn, record))
    }
}

impl CompletionWriter for GateDb {
    fn commit_completion(&self, record: &ProgressRecord, learner: &Learner) -> Result<()> {
        self.with_conn_mut(|conn| progress::commit_completion(conn, record, learner))
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub active_cohorts: u64,
    pub active_identifiers: u64,
    pub learners: u64,
    pub progress_records: u64,
}

pub(crate) fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| GateError::Parse(format!("bad timestamp '{}': {}", s, e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LearningPath;
    use chrono::{Duration, TimeZone};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_cohort_round_trip() {
        let db = GateDb::open_in_memory().unwrap();
        assert!(!db.cohort(3).unwrap().activated);

        let mut state = CohortActivation::active_since(at());
        state.released_at = Some(at() + Duration::days(2));
        db.set_cohort(3, &state).unwrap();
        assert_eq!(db.cohort(3).unwrap(), state);

        db.set_cohort(3, &CohortActivation::inactive()).unwrap();
        assert_eq!(db.cohort(3).unwrap(), CohortActivation::inactive());
    }

    #[test]
    fn test_batch_skips_already_active() {
        let db = GateDb::open_in_memory().unwrap();
        let batch = ActivationBatch {
            cohort: 3,
            activate_cohort: true,
            identifiers: vec!["A".into()],
            at: at(),
        };
        db.apply_activation(&batch).unwrap();

        let later = ActivationBatch {
            activate_cohort: false,
            identifiers: vec!["A".into(), "B".into()],
            at: at() + Duration::hours(3),
            ..batch
        };
        let outcome = db.apply_activation(&later).unwrap();
        assert_eq!(outcome.activated, vec!["B".to_string()]);
        assert_eq!(outcome.skipped, vec!["A".to_string()]);
        assert_eq!(db.identifier(3, "A").unwrap().unwrap().activated_at, Some(at()));
        assert_eq!(db.active_identifiers(3).unwrap(), vec!["A".to_string(), "B".to_string()]);
        assert!(db.identifier(3, "C").unwrap().is_none());
    }

    #[test]
    fn test_progress_upsert_keeps_one_row() {
        let db = GateDb::open_in_memory().unwrap();
        db.upsert(&ProgressRecord::completed("u1", "L1", 20, 5, at())).unwrap();
        db.upsert(&ProgressRecord::completed("u1", "L1", 90, 7, at() + Duration::days(1)))
            .unwrap();

        let records = db.records_for("u1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score, Some(90));
        assert_eq!(records[0].completed_at, Some(at() + Duration::days(1)));
        assert!(db.get("u1", "L2").unwrap().is_none());
    }

    #[test]
    fn test_identifier_binding_is_permanent() {
        let db = GateDb::open_in_memory().unwrap();
        let first = Learner::new("u1", 3, "A", LearningPath::Advanced);
        db.register_learner(&first).unwrap();

        let second = Learner::new("u2", 3, "A", LearningPath::Foundational);
        match db.register_learner(&second) {
            Err(GateError::IdentifierAlreadyBound { learner_id }) => assert_eq!(learner_id, "u1"),
            other => panic!("unexpected result: {other:?}"),
        }

        let mut loaded = db.get_learner("u1").unwrap().unwrap();
        assert_eq!(loaded.path, LearningPath::Advanced);
        loaded.award_xp(150);
        db.save_learner(&loaded).unwrap();
        assert_eq!(db.get_learner("u1").unwrap().unwrap().level, 2);

        let stats = db.stats().unwrap();
        assert_eq!(stats.learners, 1);
    }

    #[test]
    fn test_completion_commits_both_rows_or_neither() {
        let db = GateDb::open_in_memory().unwrap();
        let mut learner = Learner::new("u1", 3, "A", LearningPath::Foundational);
        db.register_learner(&learner).unwrap();

        learner.award_xp(40);
        db.commit_completion(&ProgressRecord::completed("u1", "L1", 40, 6, at()), &learner)
            .unwrap();
        assert_eq!(db.get_learner("u1").unwrap().unwrap().xp, 40);
        assert_eq!(db.get("u1", "L1").unwrap().unwrap().score, Some(40));

        // Learner row missing: the record write is rolled back
        let ghost = Learner::new("nobody", 3, "B", LearningPath::Foundational);
        let err = db
            .commit_completion(&ProgressRecord::completed("nobody", "L1", 90, 6, at()), &ghost)
            .unwrap_err();
        assert!(matches!(err, GateError::NotFound(_)));
        assert!(db.get("nobody", "L1").unwrap().is_none());
        assert_eq!(db.stats().unwrap().progress_records, 1);
    }

    #[test]
    fn test_batch_keeps_existing_cohort_timestamp() {
        let db = GateDb::open_in_memory().unwrap();
        let batch = ActivationBatch {
            cohort: 3,
            activate_cohort: true,
            identifiers: vec!["A".into()],
            at: at(),
        };
        assert_eq!(db.apply_activation(&batch).unwrap().cohort_activated_at, Some(at()));

        let again = ActivationBatch {
            at: at() + Duration::days(4),
            identifiers: vec!["B".into()],
            ..batch
        };
        assert_eq!(db.apply_activation(&again).unwrap().cohort_activated_at, Some(at()));
        assert_eq!(db.cohort(3).unwrap().activated_at, Some(at()));
    }

    #[test]
    fn test_save_unknown_learner() {
        let db = GateDb::open_in_memory().unwrap();
        let ghost = Learner::new("nobody", 1, "Z", LearningPath::Foundational);
        assert!(matches!(db.save_learner(&ghost), Err(GateError::NotFound(_))));
    }
}
