//! Unlock engine - visible lesson states for a learner's roadmap
//!
//! Lessons unlock strictly in path order: the first lesson is always open and
//! each later lesson opens once its predecessor has a completed record. A
//! lesson the learner already completed stays completed whatever its
//! predecessor says.
//!
//! Completed lessons scored under [`REMEDIATION_THRESHOLD`] still propagate the
//! unlock but remain re-enterable; a new attempt overwrites the same record.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::context::EvalContext;
use crate::model::{Lesson, ProgressRecord, ProgressStatus};

/// Scores strictly below this keep a completed lesson retriable
pub const REMEDIATION_THRESHOLD: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonState {
    Locked,
    Available,
    Completed,
}

/// What opening a lesson does from the roadmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonEntry {
    /// First attempt
    Start,
    /// Continue an in-progress attempt
    Resume,
    /// Completed under the threshold; a new attempt overwrites the record
    Retry,
    /// Completed at or above the threshold; read-only
    ReviewOnly,
    Locked,
}

impl LessonEntry {
    /// Whether opening the lesson begins or continues an attempt
    pub fn starts_attempt(&self) -> bool {
        matches!(self, LessonEntry::Start | LessonEntry::Resume | LessonEntry::Retry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonView {
    pub lesson_id: String,
    pub order_index: i32,
    pub state: LessonState,
    pub entry: LessonEntry,
    pub score: Option<u32>,
}

/// Per-lesson states in path order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UnlockMap {
    lessons: Vec<LessonView>,
}

impl UnlockMap {
    pub fn get(&self, lesson_id: &str) -> Option<&LessonView> {
        self.lessons.iter().find(|v| v.lesson_id == lesson_id)
    }

    /// State for a lesson id; unknown lessons read as locked
    pub fn state_of(&self, lesson_id: &str) -> LessonState {
        self.get(lesson_id).map(|v| v.state).unwrap_or(LessonState::Locked)
    }

    /// Entry mode for a lesson id; unknown lessons cannot be entered
    pub fn entry_for(&self, lesson_id: &str) -> LessonEntry {
        self.get(lesson_id).map(|v| v.entry).unwrap_or(LessonEntry::Locked)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LessonView> {
        self.lessons.iter()
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    /// Every lesson locked; used when progress cannot be read
    pub fn all_locked(lessons: &[Lesson]) -> Self {
        let mut ordered: Vec<&Lesson> = lessons.iter().collect();
        ordered.sort_by_key(|l| l.order_index);
        Self {
            lessons: ordered
                .into_iter()
                .map(|l| LessonView {
                    lesson_id: l.id.clone(),
                    order_index: l.order_index,
                    state: LessonState::Locked,
                    entry: LessonEntry::Locked,
                    score: None,
                })
                .collect(),
        }
    }
}

/// A completed record that may be attempted again
pub fn is_retriable(record: &ProgressRecord) -> bool {
    record.is_completed() && record.score.map(|s| s < REMEDIATION_THRESHOLD).unwrap_or(false)
}

/// Derive the unlock map for one path
///
/// `lessons` may arrive in any order; they are evaluated by `order_index`.
/// Records for lessons outside `lessons` are ignored.
pub fn compute_unlock_map(lessons: &[Lesson], records: &[ProgressRecord], ctx: &EvalContext) -> UnlockMap {
    let mut ordered: Vec<&Lesson> = lessons.iter().collect();
    ordered.sort_by_key(|l| l.order_index);

    let known: HashSet<&str> = ordered.iter().map(|l| l.id.as_str()).collect();
    let by_lesson = index_records(records, &known);

    let mut views = Vec::with_capacity(ordered.len());
    let mut predecessor_completed = true;

    for lesson in ordered {
        let record = by_lesson.get(lesson.id.as_str()).copied();
        let completed = record.map(ProgressRecord::is_completed).unwrap_or(false);

        let (state, entry) = if ctx.is_content_qa() {
            (LessonState::Available, open_entry(record))
        } else if completed {
            let entry = match record {
                Some(r) if is_retriable(r) => LessonEntry::Retry,
                _ => LessonEntry::ReviewOnly,
            };
            (LessonState::Completed, entry)
        } else if predecessor_completed {
            (LessonState::Available, open_entry(record))
        } else {
            (LessonState::Locked, LessonEntry::Locked)
        };

        views.push(LessonView {
            lesson_id: lesson.id.clone(),
            order_index: lesson.order_index,
            state,
            entry,
            score: record.and_then(|r| r.score),
        });
        predecessor_completed = completed;
    }

    UnlockMap { lessons: views }
}

fn open_entry(record: Option<&ProgressRecord>) -> LessonEntry {
    match record.map(|r| r.status) {
        Some(ProgressStatus::InProgress) => LessonEntry::Resume,
        _ => LessonEntry::Start,
    }
}

/// One record per lesson; on duplicates the latest completion wins
fn index_records<'a>(
    records: &'a [ProgressRecord],
    known: &HashSet<&str>,
) -> HashMap<&'a str, &'a ProgressRecord> {
    let mut by_lesson: HashMap<&str, &ProgressRecord> = HashMap::new();
    for record in records {
        if !known.contains(record.lesson_id.as_str()) {
            warn!(
                "Ignoring progress for learner {} on unknown lesson {}",
                record.learner_id, record.lesson_id
            );
            continue;
        }
        match by_lesson.get(record.lesson_id.as_str()) {
            Some(existing) if existing.completed_at > record.completed_at => {}
            _ => {
                by_lesson.insert(record.lesson_id.as_str(), record);
            }
        }
    }
    by_lesson
}
