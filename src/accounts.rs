//! Learner account storage
//!
//! An identifier is bound to at most one learner, and a binding is never
//! moved to another account.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{GateError, Result};
use crate::model::Learner;

pub trait LearnerStore {
    /// Fails with `IdentifierAlreadyBound` when the identifier has an account
    fn register_learner(&self, learner: &Learner) -> Result<()>;

    fn get_learner(&self, id: &str) -> Result<Option<Learner>>;

    /// Persist xp, level, path and flags
    fn save_learner(&self, learner: &Learner) -> Result<()>;
}

/// In-process learner store
#[derive(Debug, Default)]
pub struct MemoryLearnerStore {
    learners: RwLock<HashMap<String, Learner>>,
}

impl MemoryLearnerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LearnerStore for MemoryLearnerStore {
    fn register_learner(&self, learner: &Learner) -> Result<()> {
        let mut learners = self
            .learners
            .write()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))?;

        if let Some(bound) = learners.values().find(|l| l.identifier == learner.identifier) {
            return Err(GateError::IdentifierAlreadyBound {
                learner_id: bound.id.clone(),
            });
        }
        if learners.contains_key(&learner.id) {
            return Err(GateError::Database(format!("learner {} already exists", learner.id)));
        }
        learners.insert(learner.id.clone(), learner.clone());
        Ok(())
    }

    fn get_learner(&self, id: &str) -> Result<Option<Learner>> {
        let learners = self
            .learners
            .read()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(learners.get(id).cloned())
    }

    fn save_learner(&self, learner: &Learner) -> Result<()> {
        let mut learners = self
            .learners
            .write()
            .map_err(|e| GateError::Internal(format!("Lock poisoned: {}", e)))?;
        match learners.get_mut(&learner.id) {
            Some(existing) => {
                existing.path = learner.path;
                existing.xp = learner.xp;
                existing.level = learner.level;
                existing.intro_completed = learner.intro_completed;
                Ok(())
            }
            None => Err(GateError::NotFound(format!("learner {}", learner.id))),
        }
    }
}
