//! Progress ledger - one record per (learner, lesson)
//!
//! Attempts never create a second record for the same key: a retry of a
//! completed lesson overwrites the existing row when the new attempt
//! completes. Until then the earlier completion stands, so the successor
//! lesson stays unlocked.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::error::{GateError, Result};
use crate::model::{Learner, ProgressRecord, ProgressStatus};
use crate::unlock::LessonEntry;

/// Read/upsert access to progress records
pub trait ProgressLedger {
    /// All records for a learner, ordered by lesson id
    fn records_for(&self, learner_id: &str) -> Result<Vec<ProgressRecord>>;

    fn get(&self, learner_id: &str, lesson_id: &str) -> Result<Option<ProgressRecord>>;

    /// Insert or overwrite the record for `(learner_id, lesson_id)`
    fn upsert(&self, record: &ProgressRecord) -> Result<()>;
}

/// Writes a completion record and the learner's award as one unit
pub trait CompletionWriter {
    /// Either both rows are persisted or neither is
    fn commit_completion(&self, record: &ProgressRecord, learner: &Learner) -> Result<()>;
}

/// A completion ready to persist
#[derive(Debug, Clone)]
pub struct Completion {
    pub record: ProgressRecord,
    /// Learner with the award applied
    pub learner: Learner,
    pub xp_delta: u32,
}

/// Open a lesson according to its roadmap entry mode
///
/// Returns the record as it stands after the call.
pub fn begin_attempt<L: ProgressLedger + ?Sized>(
    ledger: &L,
    learner_id: &str,
    lesson_id: &str,
    entry: LessonEntry,
) -> Result<ProgressRecord> {
    let existing = ledger.get(learner_id, lesson_id)?;

    match entry {
        LessonEntry::Locked | LessonEntry::ReviewOnly => Err(GateError::LessonNotEnterable(lesson_id.to_string())),
        LessonEntry::Retry | LessonEntry::Resume => match existing {
            Some(record) => Ok(record),
            None => start(ledger, learner_id, lesson_id),
        },
        LessonEntry::Start => match existing {
            Some(record) if record.status != ProgressStatus::NotStarted => Ok(record),
            _ => start(ledger, learner_id, lesson_id),
        },
    }
}

fn start<L: ProgressLedger + ?Sized>(ledger: &L, learner_id: &str, lesson_id: &str) -> Result<ProgressRecord> {
    let record = ProgressRecord::in_progress(learner_id, lesson_id);
    ledger.upsert(&record)?;
    debug!("Learner {} started lesson {}", learner_id, lesson_id);
    Ok(record)
}

/// XP earned by a completion given the previous record
///
/// A first completion earns its score; a retry earns only the improvement.
pub fn xp_for_completion(previous: Option<&ProgressRecord>, score: u32) -> u32 {
    match previous {
        Some(prev) if prev.is_completed() => score.saturating_sub(prev.score.unwrap_or(0)),
        _ => score,
    }
}

/// Build the record and awarded learner for a completion without writing
pub fn prepare_completion<L: ProgressLedger + ?Sized>(
    ledger: &L,
    learner: &Learner,
    lesson_id: &str,
    score: u32,
    time_spent_minutes: u32,
    now: DateTime<Utc>,
) -> Result<Completion> {
    let previous = ledger.get(&learner.id, lesson_id)?;
    let xp_delta = xp_for_completion(previous.as_ref(), score);

    let mut awarded = learner.clone();
    awarded.award_xp(xp_delta);

    Ok(Completion {
        record: ProgressRecord::completed(&learner.id, lesson_id, score, time_spent_minutes, now),
        learner: awarded,
        xp_delta,
    })
}

/// Record a completed attempt in place and award XP to the learner
///
/// Only the ledger is written; `learner` changes once the record is stored.
/// Returns the XP delta.
pub fn complete_attempt<L: ProgressLedger + ?Sized>(
    ledger: &L,
    learner: &mut Learner,
    lesson_id: &str,
    score: u32,
    time_spent_minutes: u32,
    now: DateTime<Utc>,
) -> Result<u32> {
    let completion = prepare_completion(ledger, learner, lesson_id, score, time_spent_minutes, now)?;
    ledger.upsert(&completion.record)?;
    *learner = completion.learner;

    debug!(
        "Learner {} completed lesson {} (score {}, +{} xp, level {})",
        learner.id, lesson_id, score, completion.xp_delta, learner.level
    );
    Ok(completion.xp_delta)
}

/// In-process ledger
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<(String, String), ProgressRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressLedger for MemoryLedger {
    fn records_for(&self, learner_id: &str) -> Result<Vec<ProgressRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))?;
        let mut out: Vec<ProgressRecord> = records
            .values()
            .filter(|r| r.learner_id == learner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.lesson_id.cmp(&b.lesson_id));
        Ok(out)
    }

    fn get(&self, learner_id: &str, lesson_id: &str) -> Result<Option<ProgressRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(records
            .get(&(learner_id.to_string(), lesson_id.to_string()))
            .cloned())
    }

    fn upsert(&self, record: &ProgressRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))?;
        records.insert(
            (record.learner_id.clone(), record.lesson_id.clone()),
            record.clone(),
        );
        Ok(())
    }
}
