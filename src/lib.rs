//! Progression Gate - learner progression and access-gating engine
//!
//! Decides which lesson a learner may open next, whether a weak completion
//! may be retried, how long a learner's daily streak is, whether a cohort's
//! delayed assessment has opened, and whether an access-code/identifier pair
//! may create an account at all.
//!
//! ## Architecture
//!
//! ```text
//!   CohortRegistry ─┐
//!                   ├─> AccessValidator ──> signup verdict
//!   ActivationStore ┤
//!        ▲          └─> Gate scheduler ───> assessment open / days left
//!        │
//!    Activator (admin writes, all-or-nothing batches)
//!
//!   LessonCatalog ──┐
//!                   ├─> Unlock engine ────> roadmap states
//!   ProgressLedger ─┤
//!                   └─> Streak calculator > streak, weekly minutes
//! ```
//!
//! The rule functions are pure and total. `ProgressionEngine` wires them to
//! the stores and fails closed when a store cannot be read.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/progression-gate/
//! └── progression.db        # activations, learners, progress
//! ```

pub mod access;
pub mod accounts;
pub mod activation;
pub mod catalog;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod gate;
pub mod model;
pub mod progress;
pub mod registry;
pub mod streak;
pub mod unlock;

// Re-exports
pub use access::{operator_digest, AccessValidator, AccessVerdict, InvalidReason, OperatorCodes};
pub use accounts::{LearnerStore, MemoryLearnerStore};
pub use activation::{ActivationPolicy, ActivationReport, ActivationStore, Activator, MemoryActivationStore};
pub use catalog::LessonCatalog;
pub use config::Config;
pub use context::{EvalContext, OperatorGrant, OperatorRole};
pub use db::GateDb;
pub use engine::{ProgressionEngine, Stores};
pub use error::{GateError, Result};
pub use gate::{GateReason, GateStatus, POST_TEST_DELAY_DAYS};
pub use model::{LearningPath, Learner, Lesson, ProgressRecord, ProgressStatus};
pub use progress::{Completion, CompletionWriter, MemoryLedger, ProgressLedger};
pub use registry::CohortRegistry;
pub use streak::{streak_days, DashboardStats};
pub use unlock::{compute_unlock_map, LessonEntry, LessonState, UnlockMap, REMEDIATION_THRESHOLD};
