//! Administrative write path for activation state
//!
//! Every write is validated against the cohort registry before it reaches
//! the store: the cohort must exist and every identifier must be on its
//! fixed roster. A batch with any non-member is rejected whole.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::{ActivationBatch, ActivationPolicy, ActivationStore, CohortActivation};
use crate::error::{GateError, Result};
use crate::gate::{cohort_gate, GateStatus};
use crate::registry::CohortRegistry;

/// Result of an admin activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub cohort: u32,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated: Vec<String>,
    pub skipped: Vec<String>,
}

/// Admin dashboard row
#[derive(Debug, Clone, Serialize)]
pub struct CohortSummary {
    pub cohort: u32,
    pub roster_size: usize,
    pub active_identifiers: usize,
    pub activation: CohortActivation,
    pub gate: GateStatus,
}

/// Admin surface over an activation store
pub struct Activator<'a, S: ActivationStore + ?Sized> {
    registry: &'a CohortRegistry,
    store: &'a S,
    policy: ActivationPolicy,
}

impl<'a, S: ActivationStore + ?Sized> Activator<'a, S> {
    pub fn new(registry: &'a CohortRegistry, store: &'a S, policy: ActivationPolicy) -> Self {
        Self {
            registry,
            store,
            policy,
        }
    }

    /// Activate a cohort together with a selection of its roster
    ///
    /// An already-active cohort keeps its original timestamp, so the
    /// assessment countdown is not restarted.
    pub fn activate_cohort(
        &self,
        cohort: u32,
        selected: &[String],
        now: DateTime<Utc>,
    ) -> Result<ActivationReport> {
        let identifiers = self.validate_selection(cohort, selected)?;
        if identifiers.is_empty() && self.policy == ActivationPolicy::IdentifierRequired {
            return Err(GateError::EmptySelection(cohort));
        }

        let outcome = self.store.apply_activation(&ActivationBatch {
            cohort,
            activate_cohort: true,
            identifiers,
            at: now,
        })?;

        info!(
            "Cohort {} activated: {} identifiers activated, {} already active",
            cohort,
            outcome.activated.len(),
            outcome.skipped.len()
        );

        Ok(ActivationReport {
            cohort,
            activated_at: outcome.cohort_activated_at,
            activated: outcome.activated,
            skipped: outcome.skipped,
        })
    }

    /// Activate identifiers without touching the cohort flag (all-or-nothing)
    pub fn bulk_activate_identifiers(
        &self,
        cohort: u32,
        selected: &[String],
        now: DateTime<Utc>,
    ) -> Result<ActivationReport> {
        let identifiers = self.validate_selection(cohort, selected)?;
        if identifiers.is_empty() {
            return Err(GateError::EmptySelection(cohort));
        }

        let outcome = self.store.apply_activation(&ActivationBatch {
            cohort,
            activate_cohort: false,
            identifiers,
            at: now,
        })?;

        info!(
            "Bulk activation for cohort {}: {} activated, {} already active",
            cohort,
            outcome.activated.len(),
            outcome.skipped.len()
        );

        Ok(ActivationReport {
            cohort,
            activated_at: self.store.cohort(cohort)?.activated_at,
            activated: outcome.activated,
            skipped: outcome.skipped,
        })
    }

    /// Clear the cohort flag, timestamp and any manual release
    ///
    /// Identifier activations are retained.
    pub fn deactivate_cohort(&self, cohort: u32) -> Result<()> {
        self.require_cohort(cohort)?;
        self.store.set_cohort(cohort, &CohortActivation::inactive())?;
        info!("Cohort {} deactivated", cohort);
        Ok(())
    }

    /// Release the delayed assessment before its countdown ends
    pub fn release_gate(&self, cohort: u32, now: DateTime<Utc>) -> Result<CohortActivation> {
        self.require_cohort(cohort)?;
        let mut state = self.store.cohort(cohort)?;
        if !state.activated {
            return Err(GateError::CohortNotActivated(cohort));
        }
        if state.released_at.is_none() {
            state.released_at = Some(now);
            self.store.set_cohort(cohort, &state)?;
            info!("Assessment for cohort {} released manually", cohort);
        }
        Ok(state)
    }

    /// One row per registered cohort
    pub fn summaries(&self, now: DateTime<Utc>) -> Result<Vec<CohortSummary>> {
        self.registry
            .cohorts()
            .map(|c| {
                let activation = self.store.cohort(c.number)?;
                let active_identifiers = self.store.active_identifiers(c.number)?.len();
                Ok(CohortSummary {
                    cohort: c.number,
                    roster_size: c.roster_size(),
                    active_identifiers,
                    gate: cohort_gate(&activation, now),
                    activation,
                })
            })
            .collect()
    }

    fn require_cohort(&self, cohort: u32) -> Result<()> {
        if self.registry.cohort(cohort).is_none() {
            return Err(GateError::UnknownCohort(cohort));
        }
        Ok(())
    }

    /// Trim, dedupe and check roster membership for the whole selection
    fn validate_selection(&self, cohort: u32, selected: &[String]) -> Result<Vec<String>> {
        let roster = self
            .registry
            .cohort(cohort)
            .ok_or(GateError::UnknownCohort(cohort))?;

        let mut identifiers: Vec<String> = Vec::with_capacity(selected.len());
        let mut outsiders = Vec::new();
        for raw in selected {
            let id = raw.trim();
            if !roster.contains(id) {
                outsiders.push(id.to_string());
            } else if !identifiers.iter().any(|existing| existing == id) {
                identifiers.push(id.to_string());
            }
        }

        if !outsiders.is_empty() {
            return Err(GateError::NotInRoster {
                cohort,
                identifiers: outsiders,
            });
        }
        Ok(identifiers)
    }
}
