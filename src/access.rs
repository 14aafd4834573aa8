//! Access validator - signup eligibility for (access code, identifier) pairs
//!
//! A submitted code is classified into exactly one credential kind before any
//! cohort data is consulted:
//!
//! - `OperatorCredential` - matches an operator override digest; short-circuits
//!   to `AdminOverride` and never touches the registry or the store
//! - `CohortAccessCredential` - resolves to a cohort in the registry
//!
//! Validation is a pure decision. Anything unknown or unreadable is `Invalid`.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::activation::{pairing_active, ActivationPolicy, ActivationStore};
use crate::config::OperatorCodeConfig;
use crate::context::{OperatorGrant, OperatorRole};
use crate::registry::CohortRegistry;

/// Hex SHA-256 digest of an operator code, as stored in configuration
pub fn operator_digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Operator override codes, held as digests
#[derive(Debug, Clone, Default)]
pub struct OperatorCodes {
    entries: Vec<(String, OperatorRole)>,
}

impl OperatorCodes {
    pub fn from_config(operators: &[OperatorCodeConfig]) -> Self {
        Self {
            entries: operators
                .iter()
                .map(|op| (op.digest.to_ascii_lowercase(), op.role))
                .collect(),
        }
    }

    /// Build from plaintext codes (fixtures and tests)
    pub fn from_plaintext<'a>(codes: impl IntoIterator<Item = (&'a str, OperatorRole)>) -> Self {
        Self {
            entries: codes
                .into_iter()
                .map(|(code, role)| (operator_digest(code), role))
                .collect(),
        }
    }

    pub fn role_for(&self, code: &str) -> Option<OperatorRole> {
        let digest = operator_digest(code);
        self.entries
            .iter()
            .find(|(d, _)| *d == digest)
            .map(|(_, role)| *role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorCredential {
    pub role: OperatorRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortAccessCredential {
    pub cohort: u32,
}

/// Classified access code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Operator(OperatorCredential),
    Cohort(CohortAccessCredential),
}

/// Why a submission was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Blank code or identifier
    Malformed,
    UnknownCode,
    /// Identifier is not on the roster of the code's cohort
    NotOnRoster,
    /// Activation state could not be read
    Unavailable,
}

/// Signup verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum AccessVerdict {
    AdminOverride { grant: OperatorGrant },
    ValidPendingActivation { cohort: u32 },
    ValidActivated { cohort: u32 },
    Invalid { reason: InvalidReason },
}

impl AccessVerdict {
    pub fn invalid(reason: InvalidReason) -> Self {
        AccessVerdict::Invalid { reason }
    }

    /// Whether learner signup may proceed
    pub fn permits_signup(&self) -> bool {
        matches!(self, AccessVerdict::ValidActivated { .. })
    }

    pub fn cohort(&self) -> Option<u32> {
        match self {
            AccessVerdict::ValidPendingActivation { cohort } | AccessVerdict::ValidActivated { cohort } => {
                Some(*cohort)
            }
            _ => None,
        }
    }
}

/// Decides signup eligibility against the registry and activation state
pub struct AccessValidator<'a> {
    registry: &'a CohortRegistry,
    operators: &'a OperatorCodes,
    policy: ActivationPolicy,
}

impl<'a> AccessValidator<'a> {
    pub fn new(registry: &'a CohortRegistry, operators: &'a OperatorCodes, policy: ActivationPolicy) -> Self {
        Self {
            registry,
            operators,
            policy,
        }
    }

    /// Classify a code; operator codes win over cohort codes
    pub fn classify(&self, code: &str) -> Option<Credential> {
        if let Some(role) = self.operators.role_for(code) {
            return Some(Credential::Operator(OperatorCredential { role }));
        }
        self.registry
            .resolve_code(code)
            .map(|cohort| Credential::Cohort(CohortAccessCredential { cohort }))
    }

    pub fn validate<S: ActivationStore + ?Sized>(
        &self,
        store: &S,
        code: &str,
        identifier: &str,
    ) -> AccessVerdict {
        if code.trim().is_empty() {
            return AccessVerdict::invalid(InvalidReason::Malformed);
        }

        match self.classify(code) {
            Some(Credential::Operator(op)) => self.operator_verdict(op),
            Some(Credential::Cohort(cred)) => self.cohort_verdict(store, cred, identifier),
            None => {
                debug!("Access code not recognised");
                AccessVerdict::invalid(InvalidReason::UnknownCode)
            }
        }
    }

    fn operator_verdict(&self, credential: OperatorCredential) -> AccessVerdict {
        debug!("Operator credential accepted (role {})", credential.role);
        AccessVerdict::AdminOverride {
            grant: OperatorGrant::new(credential.role),
        }
    }

    fn cohort_verdict<S: ActivationStore + ?Sized>(
        &self,
        store: &S,
        credential: CohortAccessCredential,
        identifier: &str,
    ) -> AccessVerdict {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return AccessVerdict::invalid(InvalidReason::Malformed);
        }

        let cohort = credential.cohort;
        if !self.registry.is_member(cohort, identifier) {
            debug!("Identifier is not on the roster of cohort {}", cohort);
            return AccessVerdict::invalid(InvalidReason::NotOnRoster);
        }

        let cohort_state = match store.cohort(cohort) {
            Ok(state) => state,
            Err(e) => {
                warn!("Activation store unavailable for cohort {}: {}", cohort, e);
                return AccessVerdict::invalid(InvalidReason::Unavailable);
            }
        };

        let identifier_state = if self.policy == ActivationPolicy::IdentifierRequired {
            match store.identifier(cohort, identifier) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Activation store unavailable for cohort {} identifier lookup: {}", cohort, e);
                    return AccessVerdict::invalid(InvalidReason::Unavailable);
                }
            }
        } else {
            None
        };

        if pairing_active(self.policy, &cohort_state, identifier_state.as_ref()) {
            AccessVerdict::ValidActivated { cohort }
        } else {
            AccessVerdict::ValidPendingActivation { cohort }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{ActivationBatch, BatchOutcome, CohortActivation, IdentifierActivation, MemoryActivationStore};
    use crate::error::{GateError, Result};
    use crate::registry::CohortEntry;
    use chrono::Utc;

    fn registry() -> CohortRegistry {
        CohortRegistry::from_entries(vec![
            CohortEntry { number: 5, access_code: "FIVE".into(), roster: vec!["p5".into()] },
            CohortEntry { number: 6, access_code: "SIX".into(), roster: vec!["p6".into()] },
        ])
        .unwrap()
    }

    fn operators() -> OperatorCodes {
        OperatorCodes::from_plaintext([("op-admin", OperatorRole::Admin), ("op-qa", OperatorRole::ContentQa)])
    }

    struct DownStore;

    impl ActivationStore for DownStore {
        fn cohort(&self, _number: u32) -> Result<CohortActivation> {
            Err(GateError::Database("connection refused".into()))
        }
        fn identifier(&self, _number: u32, _identifier: &str) -> Result<Option<IdentifierActivation>> {
            Err(GateError::Database("connection refused".into()))
        }
        fn active_identifiers(&self, _number: u32) -> Result<Vec<String>> {
            Err(GateError::Database("connection refused".into()))
        }
        fn set_cohort(&self, _number: u32, _state: &CohortActivation) -> Result<()> {
            Err(GateError::Database("connection refused".into()))
        }
        fn apply_activation(&self, _batch: &ActivationBatch) -> Result<BatchOutcome> {
            Err(GateError::Database("connection refused".into()))
        }
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        assert_eq!(
            operator_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_operator_short_circuits() {
        let (registry, ops) = (registry(), operators());
        let validator = AccessValidator::new(&registry, &ops, ActivationPolicy::IdentifierRequired);

        // No identifier needed and the store is never consulted
        let verdict = validator.validate(&DownStore, "op-admin", "");
        match verdict {
            AccessVerdict::AdminOverride { grant } => assert_eq!(grant.role(), OperatorRole::Admin),
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert!(!validator.validate(&DownStore, "op-qa", "").permits_signup());
    }

    #[test]
    fn test_cross_cohort_pairing_invalid() {
        let (registry, ops) = (registry(), operators());
        let validator = AccessValidator::new(&registry, &ops, ActivationPolicy::CohortImpliesRoster);
        let store = MemoryActivationStore::new();
        store.set_cohort(5, &CohortActivation::active_since(Utc::now())).unwrap();
        store.set_cohort(6, &CohortActivation::active_since(Utc::now())).unwrap();

        assert_eq!(
            validator.validate(&store, "FIVE", "p6"),
            AccessVerdict::invalid(InvalidReason::NotOnRoster)
        );
    }

    #[test]
    fn test_malformed_and_unknown() {
        let (registry, ops) = (registry(), operators());
        let validator = AccessValidator::new(&registry, &ops, ActivationPolicy::IdentifierRequired);
        let store = MemoryActivationStore::new();

        assert_eq!(validator.validate(&store, "  ", "p5"), AccessVerdict::invalid(InvalidReason::Malformed));
        assert_eq!(validator.validate(&store, "FIVE", "   "), AccessVerdict::invalid(InvalidReason::Malformed));
        assert_eq!(validator.validate(&store, "NOPE", "p5"), AccessVerdict::invalid(InvalidReason::UnknownCode));
    }

    #[test]
    fn test_pending_then_activated() {
        let (registry, ops) = (registry(), operators());
        let validator = AccessValidator::new(&registry, &ops, ActivationPolicy::IdentifierRequired);
        let store = MemoryActivationStore::new();

        let verdict = validator.validate(&store, "FIVE", " p5 ");
        assert_eq!(verdict, AccessVerdict::ValidPendingActivation { cohort: 5 });
        assert_eq!(verdict.cohort(), Some(5));

        let now = Utc::now();
        store
            .apply_activation(&ActivationBatch {
                cohort: 5,
                activate_cohort: true,
                identifiers: vec!["p5".into()],
                at: now,
            })
            .unwrap();
        let verdict = validator.validate(&store, "FIVE", "p5");
        assert_eq!(verdict, AccessVerdict::ValidActivated { cohort: 5 });
        assert!(verdict.permits_signup());
    }

    #[test]
    fn test_store_failure_fails_closed() {
        let (registry, ops) = (registry(), operators());
        let validator = AccessValidator::new(&registry, &ops, ActivationPolicy::IdentifierRequired);
        assert_eq!(
            validator.validate(&DownStore, "FIVE", "p5"),
            AccessVerdict::invalid(InvalidReason::Unavailable)
        );
    }

    #[test]
    fn test_verdict_serializes_with_kebab_tag() {
        let json = serde_json::to_value(AccessVerdict::ValidPendingActivation { cohort: 3 }).unwrap();
        assert_eq!(json["verdict"], "valid-pending-activation");
        assert_eq!(json["cohort"], 3);
    }
}
