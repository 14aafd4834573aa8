//! Core domain types shared by every rule family
//!
//! Learners, lessons and progress records. Timestamps are UTC instants;
//! calendar-day reasoning happens in `streak` with an explicit timezone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GateError;

/// XP needed per level step
pub const XP_PER_LEVEL: u32 = 100;

/// Learning path a learner follows (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningPath {
    Foundational,
    Advanced,
}

impl fmt::Display for LearningPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearningPath::Foundational => write!(f, "foundational"),
            LearningPath::Advanced => write!(f, "advanced"),
        }
    }
}

impl FromStr for LearningPath {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "foundational" => Ok(LearningPath::Foundational),
            "advanced" => Ok(LearningPath::Advanced),
            other => Err(GateError::Parse(format!("unknown learning path '{}'", other))),
        }
    }
}

/// Learner account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Learner {
    pub id: String,
    pub cohort: u32,
    /// Individual identifier from the cohort roster; never reassigned once bound
    pub identifier: String,
    pub path: LearningPath,
    pub xp: u32,
    pub level: u32,
    #[serde(default)]
    pub intro_completed: bool,
}

impl Learner {
    pub fn new(
        id: impl Into<String>,
        cohort: u32,
        identifier: impl Into<String>,
        path: LearningPath,
    ) -> Self {
        Self {
            id: id.into(),
            cohort,
            identifier: identifier.into(),
            path,
            xp: 0,
            level: level_for_xp(0),
            intro_completed: false,
        }
    }

    /// Add XP and recompute the level
    pub fn award_xp(&mut self, xp: u32) {
        self.xp = self.xp.saturating_add(xp);
        self.level = level_for_xp(self.xp);
    }
}

/// Level derived from accumulated XP (starts at 1)
pub fn level_for_xp(xp: u32) -> u32 {
    xp / XP_PER_LEVEL + 1
}

/// Lesson metadata (read-only content)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub path: LearningPath,
    /// Unique within a path
    pub order_index: i32,
    #[serde(default)]
    pub estimated_minutes: u32,
    /// Free-form label, not authoritative
    #[serde(default)]
    pub competence: Option<String>,
}

/// Progress status for a (learner, lesson) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStatus {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ProgressStatus::NotStarted),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            other => Err(GateError::Parse(format!("unknown progress status '{}'", other))),
        }
    }
}

/// One record per (learner, lesson); a retry overwrites it in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub learner_id: String,
    pub lesson_id: String,
    pub status: ProgressStatus,
    pub score: Option<u32>,
    #[serde(default)]
    pub time_spent_minutes: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn in_progress(learner_id: impl Into<String>, lesson_id: impl Into<String>) -> Self {
        Self {
            learner_id: learner_id.into(),
            lesson_id: lesson_id.into(),
            status: ProgressStatus::InProgress,
            score: None,
            time_spent_minutes: 0,
            completed_at: None,
        }
    }

    pub fn completed(
        learner_id: impl Into<String>,
        lesson_id: impl Into<String>,
        score: u32,
        time_spent_minutes: u32,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            learner_id: learner_id.into(),
            lesson_id: lesson_id.into(),
            status: ProgressStatus::Completed,
            score: Some(score),
            time_spent_minutes,
            completed_at: Some(completed_at),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }
}
