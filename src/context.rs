//! Evaluation context passed explicitly to every decision function
//!
//! Carries the wall-clock instant and the unlock mode. The content-QA mode
//! (every lesson available) can only be built from an `OperatorGrant`, and an
//! `OperatorGrant` is only issued by the access validator for a matching
//! operator credential, so a learner identity has no path to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role attached to an operator override code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    /// Routed to the administrative surface
    Admin,
    /// Content QA session; may force every lesson open
    ContentQa,
}

impl std::fmt::Display for OperatorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorRole::Admin => write!(f, "admin"),
            OperatorRole::ContentQa => write!(f, "content_qa"),
        }
    }
}

/// Proof that an operator credential was verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorGrant {
    role: OperatorRole,
}

impl OperatorGrant {
    pub(crate) fn new(role: OperatorRole) -> Self {
        Self { role }
    }

    pub fn role(&self) -> OperatorRole {
        self.role
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnlockMode {
    Standard,
    ContentQa,
}

/// Declared inputs for one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalContext {
    now: DateTime<Utc>,
    mode: UnlockMode,
}

impl EvalContext {
    /// Normal learner evaluation
    pub fn learner(now: DateTime<Utc>) -> Self {
        Self {
            now,
            mode: UnlockMode::Standard,
        }
    }

    /// Content QA evaluation: unlock propagation is bypassed
    pub fn content_qa(_grant: &OperatorGrant, now: DateTime<Utc>) -> Self {
        Self {
            now,
            mode: UnlockMode::ContentQa,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn is_content_qa(&self) -> bool {
        self.mode == UnlockMode::ContentQa
    }
}

impl std::fmt::Display for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EvalContext({}, qa={})", self.now.to_rfc3339(), self.is_content_qa())
    }
}
