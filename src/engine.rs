//! Progression engine - the decision functions wired to their stores
//!
//! The rule modules are pure. This facade fetches their inputs from the
//! stores and turns any store failure into the fail-closed outcome: a
//! locked roadmap, a zero streak, an `Invalid` verdict or a closed gate.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::access::{AccessValidator, AccessVerdict, OperatorCodes};
use crate::accounts::LearnerStore;
use crate::activation::{ActivationPolicy, ActivationStore, Activator};
use crate::catalog::LessonCatalog;
use crate::context::EvalContext;
use crate::error::{GateError, Result};
use crate::gate::{evaluate_gate, GateStatus};
use crate::model::{LearningPath, Learner, ProgressRecord};
use crate::progress::{begin_attempt, prepare_completion, Completion, CompletionWriter, ProgressLedger};
use crate::registry::CohortRegistry;
use crate::streak::{streak_days, DashboardStats};
use crate::unlock::{compute_unlock_map, UnlockMap};

/// Stores consumed by the engine
pub struct Stores<'a> {
    pub activations: &'a dyn ActivationStore,
    pub ledger: &'a dyn ProgressLedger,
    pub learners: &'a dyn LearnerStore,
    /// Writes a completion and the learner award together. Without one the
    /// learner is saved first and restored if the record write fails.
    pub completions: Option<&'a dyn CompletionWriter>,
}

impl<'a> Stores<'a> {
    /// Independent stores with no shared transaction
    pub fn split(
        activations: &'a dyn ActivationStore,
        ledger: &'a dyn ProgressLedger,
        learners: &'a dyn LearnerStore,
    ) -> Self {
        Self {
            activations,
            ledger,
            learners,
            completions: None,
        }
    }

    /// One backend serving every store
    pub fn shared<B>(backend: &'a B) -> Self
    where
        B: ActivationStore + ProgressLedger + LearnerStore + CompletionWriter,
    {
        Self {
            activations: backend,
            ledger: backend,
            learners: backend,
            completions: Some(backend),
        }
    }
}

pub struct ProgressionEngine<'a> {
    registry: CohortRegistry,
    catalog: LessonCatalog,
    operators: OperatorCodes,
    policy: ActivationPolicy,
    default_timezone: String,
    stores: Stores<'a>,
}

impl<'a> ProgressionEngine<'a> {
    pub fn new(registry: CohortRegistry, catalog: LessonCatalog, stores: Stores<'a>) -> Self {
        Self {
            registry,
            catalog,
            operators: OperatorCodes::default(),
            policy: ActivationPolicy::default(),
            default_timezone: "UTC".to_string(),
            stores,
        }
    }

    pub fn with_operators(mut self, operators: OperatorCodes) -> Self {
        self.operators = operators;
        self
    }

    pub fn with_policy(mut self, policy: ActivationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    pub fn policy(&self) -> ActivationPolicy {
        self.policy
    }

    pub fn catalog(&self) -> &LessonCatalog {
        &self.catalog
    }

    /// Admin write surface sharing this engine's registry and policy
    pub fn activator(&self) -> Activator<'_, dyn ActivationStore + 'a> {
        Activator::new(&self.registry, self.stores.activations, self.policy)
    }

    pub fn validate_access(&self, code: &str, identifier: &str) -> AccessVerdict {
        AccessValidator::new(&self.registry, &self.operators, self.policy).validate(
            self.stores.activations,
            code,
            identifier,
        )
    }

    /// Create a learner account for an activated (code, identifier) pair
    pub fn register(
        &self,
        code: &str,
        identifier: &str,
        learner_id: &str,
        path: LearningPath,
    ) -> Result<Learner> {
        let cohort = match self.validate_access(code, identifier) {
            AccessVerdict::ValidActivated { cohort } => cohort,
            AccessVerdict::ValidPendingActivation { cohort } => {
                return Err(GateError::SignupNotPermitted(format!(
                    "cohort {} pairing is not activated yet",
                    cohort
                )))
            }
            AccessVerdict::AdminOverride { .. } => {
                return Err(GateError::SignupNotPermitted("operator codes cannot create learner accounts".into()))
            }
            AccessVerdict::Invalid { .. } => {
                return Err(GateError::SignupNotPermitted("invalid access code or identifier".into()))
            }
        };

        let learner = Learner::new(learner_id, cohort, identifier.trim(), path);
        self.stores.learners.register_learner(&learner)?;
        info!("Learner {} signed up in cohort {}", learner.id, cohort);
        Ok(learner)
    }

    pub fn learner(&self, learner_id: &str) -> Result<Learner> {
        self.stores
            .learners
            .get_learner(learner_id)?
            .ok_or_else(|| GateError::NotFound(format!("learner {}", learner_id)))
    }

    /// Unlock map for the learner's path; locked throughout if progress is unreadable
    pub fn roadmap(&self, learner: &Learner, ctx: &EvalContext) -> UnlockMap {
        let lessons = self.catalog.lessons_for(learner.path);
        match self.stores.ledger.records_for(&learner.id) {
            Ok(records) => compute_unlock_map(lessons, &records, ctx),
            Err(e) => {
                warn!("Progress unavailable for learner {}, locking roadmap: {}", learner.id, e);
                UnlockMap::all_locked(lessons)
            }
        }
    }

    /// Begin or resume a lesson the roadmap allows
    pub fn open_lesson(&self, learner: &Learner, lesson_id: &str, ctx: &EvalContext) -> Result<ProgressRecord> {
        let entry = self.roadmap(learner, ctx).entry_for(lesson_id);
        begin_attempt(self.stores.ledger, &learner.id, lesson_id, entry)
    }

    /// Record a completion, award XP and persist the learner
    ///
    /// The record and the award are stored together or not at all; `learner`
    /// is updated only on success. Returns the XP delta.
    pub fn complete_lesson(
        &self,
        learner: &mut Learner,
        lesson_id: &str,
        score: u32,
        time_spent_minutes: u32,
        ctx: &EvalContext,
    ) -> Result<u32> {
        let entry = self.roadmap(learner, ctx).entry_for(lesson_id);
        if !entry.starts_attempt() {
            return Err(GateError::LessonNotEnterable(lesson_id.to_string()));
        }

        let completion = prepare_completion(self.stores.ledger, learner, lesson_id, score, time_spent_minutes, ctx.now())?;
        match self.stores.completions {
            Some(writer) => writer.commit_completion(&completion.record, &completion.learner)?,
            None => self.commit_split(learner, &completion)?,
        }

        debug!(
            "Learner {} completed lesson {} (score {}, +{} xp)",
            learner.id, lesson_id, score, completion.xp_delta
        );
        *learner = completion.learner;
        Ok(completion.xp_delta)
    }

    fn commit_split(&self, previous: &Learner, completion: &Completion) -> Result<()> {
        self.stores.learners.save_learner(&completion.learner)?;
        if let Err(e) = self.stores.ledger.upsert(&completion.record) {
            if let Err(restore) = self.stores.learners.save_learner(previous) {
                error!("Learner {} xp not restored after failed completion: {}", previous.id, restore);
            }
            return Err(e);
        }
        Ok(())
    }

    fn progress_snapshot(&self, learner_id: &str) -> Option<Vec<ProgressRecord>> {
        match self.stores.ledger.records_for(learner_id) {
            Ok(records) => Some(records),
            Err(e) => {
                warn!("Progress unavailable for learner {}: {}", learner_id, e);
                None
            }
        }
    }

    /// Consecutive-day streak; zero when progress is unreadable
    pub fn streak(&self, learner_id: &str, timezone: Option<&str>, now: DateTime<Utc>) -> u32 {
        let tz = timezone.unwrap_or(self.default_timezone.as_str());
        match self.progress_snapshot(learner_id) {
            Some(records) => streak_days(
                records.iter().filter(|r| r.is_completed()).filter_map(|r| r.completed_at),
                tz,
                now,
            ),
            None => 0,
        }
    }

    pub fn dashboard(&self, learner_id: &str, timezone: Option<&str>, now: DateTime<Utc>) -> DashboardStats {
        let tz = timezone.unwrap_or(self.default_timezone.as_str());
        self.progress_snapshot(learner_id)
            .map(|records| DashboardStats::from_records(&records, tz, now))
            .unwrap_or_default()
    }

    /// Delayed assessment gate for one learner; closed if state is unreadable
    pub fn gate(&self, learner: &Learner, now: DateTime<Utc>) -> GateStatus {
        let activations = self.stores.activations;
        let cohort = match activations.cohort(learner.cohort) {
            Ok(state) => state,
            Err(e) => {
                warn!("Activation state unavailable for cohort {}: {}", learner.cohort, e);
                return GateStatus::unavailable();
            }
        };

        let identifier = match activations.identifier(learner.cohort, &learner.identifier) {
            Ok(state) => state,
            Err(e) => {
                warn!("Identifier activation unavailable for learner {}: {}", learner.id, e);
                return GateStatus::unavailable();
            }
        };

        evaluate_gate(self.policy, &cohort, identifier.as_ref(), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryLearnerStore;
    use crate::activation::MemoryActivationStore;
    use crate::context::OperatorRole;
    use crate::gate::GateReason;
    use crate::model::Lesson;
    use crate::progress::MemoryLedger;
    use crate::registry::CohortEntry;
    use crate::unlock::{LessonEntry, LessonState};
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct BrokenLedger;

    impl ProgressLedger for BrokenLedger {
        fn records_for(&self, _learner_id: &str) -> Result<Vec<ProgressRecord>> {
            Err(GateError::Database("disk I/O error".into()))
        }
        fn get(&self, _learner_id: &str, _lesson_id: &str) -> Result<Option<ProgressRecord>> {
            Err(GateError::Database("disk I/O error".into()))
        }
        fn upsert(&self, _record: &ProgressRecord) -> Result<()> {
            Err(GateError::Database("disk I/O error".into()))
        }
    }

    /// Learner store whose saves fail while `failing` is set
    #[derive(Default)]
    struct FlakyLearners {
        inner: MemoryLearnerStore,
        failing: AtomicBool,
    }

    impl LearnerStore for FlakyLearners {
        fn register_learner(&self, learner: &Learner) -> Result<()> {
            self.inner.register_learner(learner)
        }
        fn get_learner(&self, id: &str) -> Result<Option<Learner>> {
            self.inner.get_learner(id)
        }
        fn save_learner(&self, learner: &Learner) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(GateError::Database("database is locked".into()));
            }
            self.inner.save_learner(learner)
        }
    }

    /// Ledger that reads but refuses writes
    #[derive(Default)]
    struct ReadOnlyLedger(MemoryLedger);

    impl ProgressLedger for ReadOnlyLedger {
        fn records_for(&self, learner_id: &str) -> Result<Vec<ProgressRecord>> {
            self.0.records_for(learner_id)
        }
        fn get(&self, learner_id: &str, lesson_id: &str) -> Result<Option<ProgressRecord>> {
            self.0.get(learner_id, lesson_id)
        }
        fn upsert(&self, _record: &ProgressRecord) -> Result<()> {
            Err(GateError::Database("disk full".into()))
        }
    }

    fn registry() -> CohortRegistry {
        CohortRegistry::from_entries(vec![CohortEntry {
            number: 3,
            access_code: "XYZ".into(),
            roster: vec!["A".into(), "B".into(), "C".into()],
        }])
        .unwrap()
    }

    fn catalog() -> LessonCatalog {
        LessonCatalog::from_lessons(
            (1..=3)
                .map(|i| Lesson {
                    id: format!("L{}", i),
                    title: format!("Lesson {}", i),
                    path: LearningPath::Foundational,
                    order_index: i,
                    estimated_minutes: 10,
                    competence: None,
                })
                .collect(),
        )
        .unwrap()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_signup_follows_activation() {
        let (activations, ledger, learners) = (MemoryActivationStore::new(), MemoryLedger::new(), MemoryLearnerStore::new());
        let engine = ProgressionEngine::new(
            registry(),
            catalog(),
            Stores::split(&activations, &ledger, &learners),
        );
        let now = Utc::now();

        assert!(matches!(
            engine.register("XYZ", "A", "u1", LearningPath::Foundational),
            Err(GateError::SignupNotPermitted(_))
        ));

        engine.activator().activate_cohort(3, &ids(&["A"]), now).unwrap();
        assert_eq!(engine.validate_access("XYZ", "A"), AccessVerdict::ValidActivated { cohort: 3 });
        assert_eq!(engine.validate_access("XYZ", "B"), AccessVerdict::ValidPendingActivation { cohort: 3 });

        let learner = engine.register("XYZ", " A ", "u1", LearningPath::Foundational).unwrap();
        assert_eq!(learner.identifier, "A");
        assert!(matches!(
            engine.register("XYZ", "A", "u9", LearningPath::Foundational),
            Err(GateError::IdentifierAlreadyBound { .. })
        ));
    }

    #[test]
    fn test_operator_code_cannot_sign_up() {
        let (activations, ledger, learners) = (MemoryActivationStore::new(), MemoryLedger::new(), MemoryLearnerStore::new());
        let engine = ProgressionEngine::new(
            registry(),
            catalog(),
            Stores::split(&activations, &ledger, &learners),
        )
        .with_operators(OperatorCodes::from_plaintext([("letmein", OperatorRole::Admin)]));

        assert!(matches!(engine.validate_access("letmein", ""), AccessVerdict::AdminOverride { .. }));
        assert!(engine.register("letmein", "A", "u1", LearningPath::Foundational).is_err());
    }

    #[test]
    fn test_lesson_flow_and_retry() {
        let (activations, ledger, learners) = (MemoryActivationStore::new(), MemoryLedger::new(), MemoryLearnerStore::new());
        let engine = ProgressionEngine::new(
            registry(),
            catalog(),
            Stores::split(&activations, &ledger, &learners),
        )
        .with_policy(ActivationPolicy::CohortImpliesRoster);
        let now = Utc::now();
        engine.activator().activate_cohort(3, &[], now).unwrap();
        let mut learner = engine.register("XYZ", "B", "u1", LearningPath::Foundational).unwrap();
        let ctx = EvalContext::learner(now);

        assert!(matches!(
            engine.complete_lesson(&mut learner, "L2", 90, 5, &ctx),
            Err(GateError::LessonNotEnterable(_))
        ));

        engine.open_lesson(&learner, "L1", &ctx).unwrap();
        assert_eq!(engine.complete_lesson(&mut learner, "L1", 25, 9, &ctx).unwrap(), 25);
        assert_eq!(engine.roadmap(&learner, &ctx).state_of("L2"), LessonState::Available);

        // Weak score: retry overwrites and tops XP up to the new score
        assert_eq!(engine.complete_lesson(&mut learner, "L1", 80, 6, &ctx).unwrap(), 55);
        assert_eq!(ledger.records_for("u1").unwrap().len(), 1);
        assert_eq!(engine.learner("u1").unwrap().xp, 80);

        // Strong score: review only
        assert!(engine.complete_lesson(&mut learner, "L1", 100, 6, &ctx).is_err());
        assert_eq!(engine.streak("u1", None, now), 1);
        assert_eq!(engine.dashboard("u1", Some("UTC"), now).minutes_this_week, 6);
    }

    #[test]
    fn test_retry_of_later_lesson_keeps_predecessor() {
        let (activations, ledger, learners) = (MemoryActivationStore::new(), MemoryLedger::new(), MemoryLearnerStore::new());
        let engine = ProgressionEngine::new(registry(), catalog(), Stores::split(&activations, &ledger, &learners))
            .with_policy(ActivationPolicy::CohortImpliesRoster);
        let now = Utc::now();
        engine.activator().activate_cohort(3, &[], now).unwrap();
        let mut learner = engine.register("XYZ", "A", "u1", LearningPath::Foundational).unwrap();
        let ctx = EvalContext::learner(now);

        engine.complete_lesson(&mut learner, "L1", 80, 5, &ctx).unwrap();
        engine.complete_lesson(&mut learner, "L2", 30, 5, &ctx).unwrap();
        let map = engine.roadmap(&learner, &ctx);
        assert_eq!(map.entry_for("L2"), LessonEntry::Retry);
        assert_eq!(map.state_of("L3"), LessonState::Available);

        engine.open_lesson(&learner, "L2", &ctx).unwrap();
        assert_eq!(engine.complete_lesson(&mut learner, "L2", 60, 5, &ctx).unwrap(), 30);

        let map = engine.roadmap(&learner, &ctx);
        assert_eq!(map.state_of("L1"), LessonState::Completed);
        assert_eq!(map.entry_for("L1"), LessonEntry::ReviewOnly);
        assert_eq!(map.entry_for("L2"), LessonEntry::ReviewOnly);
        assert_eq!(map.state_of("L3"), LessonState::Available);

        let records = ledger.records_for("u1").unwrap();
        assert_eq!(records.iter().filter(|r| r.lesson_id == "L2").count(), 1);
        assert_eq!(records.iter().find(|r| r.lesson_id == "L1").unwrap().score, Some(80));
    }

    #[test]
    fn test_failed_learner_save_records_nothing() {
        let (activations, ledger, learners) = (MemoryActivationStore::new(), MemoryLedger::new(), FlakyLearners::default());
        let engine = ProgressionEngine::new(registry(), catalog(), Stores::split(&activations, &ledger, &learners))
            .with_policy(ActivationPolicy::CohortImpliesRoster);
        let now = Utc::now();
        engine.activator().activate_cohort(3, &[], now).unwrap();
        let mut learner = engine.register("XYZ", "A", "u1", LearningPath::Foundational).unwrap();
        let ctx = EvalContext::learner(now);

        learners.failing.store(true, Ordering::SeqCst);
        assert!(engine.complete_lesson(&mut learner, "L1", 30, 5, &ctx).is_err());
        assert!(ledger.get("u1", "L1").unwrap().is_none());
        assert_eq!(learner.xp, 0);

        // The next attempt still earns the full score
        learners.failing.store(false, Ordering::SeqCst);
        assert_eq!(engine.complete_lesson(&mut learner, "L1", 30, 5, &ctx).unwrap(), 30);
        assert_eq!(engine.learner("u1").unwrap().xp, 30);
        assert_eq!(learner.xp, 30);
    }

    #[test]
    fn test_failed_record_write_restores_learner() {
        let (activations, ledger, learners) = (MemoryActivationStore::new(), ReadOnlyLedger::default(), MemoryLearnerStore::new());
        let engine = ProgressionEngine::new(registry(), catalog(), Stores::split(&activations, &ledger, &learners))
            .with_policy(ActivationPolicy::CohortImpliesRoster);
        let now = Utc::now();
        engine.activator().activate_cohort(3, &[], now).unwrap();
        let mut learner = engine.register("XYZ", "A", "u1", LearningPath::Foundational).unwrap();

        let err = engine
            .complete_lesson(&mut learner, "L1", 70, 5, &EvalContext::learner(now))
            .unwrap_err();
        assert!(matches!(err, GateError::Database(_)));
        assert_eq!(learner.xp, 0);
        assert_eq!(engine.learner("u1").unwrap().xp, 0);
    }

    #[test]
    fn test_ledger_failure_fails_closed() {
        let (activations, learners) = (MemoryActivationStore::new(), MemoryLearnerStore::new());
        let engine = ProgressionEngine::new(
            registry(),
            catalog(),
            Stores::split(&activations, &BrokenLedger, &learners),
        );
        let learner = Learner::new("u1", 3, "A", LearningPath::Foundational);
        let map = engine.roadmap(&learner, &EvalContext::learner(Utc::now()));
        assert_eq!(map.len(), 3);
        assert!(map.iter().all(|v| v.state == LessonState::Locked));
        assert_eq!(engine.streak("u1", None, Utc::now()), 0);
        assert_eq!(engine.dashboard("u1", None, Utc::now()), DashboardStats::default());
    }

    #[test]
    fn test_gate_for_learner() {
        let (activations, ledger, learners) = (MemoryActivationStore::new(), MemoryLedger::new(), MemoryLearnerStore::new());
        let engine = ProgressionEngine::new(
            registry(),
            catalog(),
            Stores::split(&activations, &ledger, &learners),
        );
        let start = Utc::now() - Duration::days(27);
        engine.activator().activate_cohort(3, &ids(&["A"]), start).unwrap();

        let a = Learner::new("u1", 3, "A", LearningPath::Foundational);
        let b = Learner::new("u2", 3, "B", LearningPath::Foundational);
        assert!(engine.gate(&a, Utc::now()).open);
        assert_eq!(engine.gate(&b, Utc::now()).reason, GateReason::IdentifierNotActivated);
    }
}
