//! Activation store - cohort and identifier activation flags
//!
//! The only shared mutable state in the engine. Reads feed the access
//! validator and the gate scheduler; writes come exclusively from the
//! administrative `Activator`.
//!
//! ## Write discipline
//!
//! - A cohort transition (flag + timestamp + manual release) is one write.
//! - An `ActivationBatch` is applied all-or-nothing: either every listed
//!   identifier is activated (or reported as already active) or nothing is.

pub mod admin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{GateError, Result};

pub use admin::{ActivationReport, Activator, CohortSummary};

/// How cohort-level and identifier-level activation combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationPolicy {
    /// Cohort active AND identifier individually active
    #[default]
    IdentifierRequired,
    /// Cohort activation opens every roster member
    CohortImpliesRoster,
}

/// Cohort-level activation state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortActivation {
    pub activated: bool,
    pub activated_at: Option<DateTime<Utc>>,
    /// Manual early release of the delayed assessment
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
}

impl CohortActivation {
    pub fn active_since(at: DateTime<Utc>) -> Self {
        Self {
            activated: true,
            activated_at: Some(at),
            released_at: None,
        }
    }

    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Identifier-level activation state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierActivation {
    pub activated: bool,
    pub activated_at: Option<DateTime<Utc>>,
}

/// Whether a roster member's pairing is open under `policy`
///
/// Roster membership is checked by the caller; this only combines flags.
pub fn pairing_active(
    policy: ActivationPolicy,
    cohort: &CohortActivation,
    identifier: Option<&IdentifierActivation>,
) -> bool {
    if !cohort.activated {
        return false;
    }
    match policy {
        ActivationPolicy::CohortImpliesRoster => true,
        ActivationPolicy::IdentifierRequired => identifier.map(|i| i.activated).unwrap_or(false),
    }
}

/// Cohort state after activating at `at`
///
/// An already-active cohort keeps its original timestamp.
pub fn activated_state(current: CohortActivation, at: DateTime<Utc>) -> CohortActivation {
    if current.activated && current.activated_at.is_some() {
        current
    } else {
        CohortActivation::active_since(at)
    }
}

/// A validated admin write, applied atomically by the store
#[derive(Debug, Clone)]
pub struct ActivationBatch {
    pub cohort: u32,
    /// Also activate the cohort; the store decides the timestamp under its write lock
    pub activate_cohort: bool,
    pub identifiers: Vec<String>,
    pub at: DateTime<Utc>,
}

/// Per-identifier result of an applied batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub activated: Vec<String>,
    /// Already active; timestamp left untouched
    pub skipped: Vec<String>,
    /// Effective cohort activation instant when the batch activated the cohort
    pub cohort_activated_at: Option<DateTime<Utc>>,
}

/// Read/write interface to activation state
pub trait ActivationStore {
    /// Cohort state; an unknown cohort reads as inactive
    fn cohort(&self, number: u32) -> Result<CohortActivation>;

    fn identifier(&self, number: u32, identifier: &str) -> Result<Option<IdentifierActivation>>;

    /// Identifiers currently active in a cohort, sorted
    fn active_identifiers(&self, number: u32) -> Result<Vec<String>>;

    fn set_cohort(&self, number: u32, state: &CohortActivation) -> Result<()>;

    fn apply_activation(&self, batch: &ActivationBatch) -> Result<BatchOutcome>;
}

#[derive(Debug, Default)]
struct MemoryState {
    cohorts: HashMap<u32, CohortActivation>,
    identifiers: HashMap<(u32, String), IdentifierActivation>,
}

/// In-process activation store
#[derive(Debug, Default)]
pub struct MemoryActivationStore {
    state: RwLock<MemoryState>,
}

impl MemoryActivationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))
    }
}

impl ActivationStore for MemoryActivationStore {
    fn cohort(&self, number: u32) -> Result<CohortActivation> {
        Ok(self.read()?.cohorts.get(&number).cloned().unwrap_or_default())
    }

    fn identifier(&self, number: u32, identifier: &str) -> Result<Option<IdentifierActivation>> {
        Ok(self
            .read()?
            .identifiers
            .get(&(number, identifier.to_string()))
            .cloned())
    }

    fn active_identifiers(&self, number: u32) -> Result<Vec<String>> {
        let state = self.read()?;
        let mut ids: Vec<String> = state
            .identifiers
            .iter()
            .filter(|((n, _), a)| *n == number && a.activated)
            .map(|((_, id), _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn set_cohort(&self, number: u32, state: &CohortActivation) -> Result<()> {
        self.write()?.cohorts.insert(number, state.clone());
        Ok(())
    }

    fn apply_activation(&self, batch: &ActivationBatch) -> Result<BatchOutcome> {
        // Single write guard for the whole batch
        let mut state = self.write()?;
        let mut outcome = BatchOutcome::default();

        if batch.activate_cohort {
            let current = state.cohorts.get(&batch.cohort).cloned().unwrap_or_default();
            let next = activated_state(current, batch.at);
            outcome.cohort_activated_at = next.activated_at;
            state.cohorts.insert(batch.cohort, next);
        }

        for id in &batch.identifiers {
            let key = (batch.cohort, id.clone());
            match state.identifiers.get(&key) {
                Some(existing) if existing.activated => outcome.skipped.push(id.clone()),
                _ => {
                    state.identifiers.insert(
                        key,
                        IdentifierActivation {
                            activated: true,
                            activated_at: Some(batch.at),
                        },
                    );
                    outcome.activated.push(id.clone());
                }
            }
        }

        Ok(outcome)
    }
}
