//! Gate scheduler - time-delayed assessment availability
//!
//! A cohort's delayed assessment opens a fixed number of days after the
//! cohort was activated. The boundary is inclusive: `now == unlock_at` is
//! open. While closed, the remaining time is reported in whole days,
//! rounded up.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::activation::{pairing_active, ActivationPolicy, CohortActivation, IdentifierActivation};

/// Delay between cohort activation and assessment availability
pub const POST_TEST_DELAY_DAYS: i64 = 27;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Why the gate is in its current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    /// Cohort not activated; no countdown yet
    NotScheduled,
    /// Cohort active but this identifier is not
    IdentifierNotActivated,
    CountingDown,
    Elapsed,
    /// Opened early by an administrator
    Released,
    /// Activation state could not be read
    Unavailable,
}

/// Gate verdict for the results/assessment page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStatus {
    pub open: bool,
    /// Whole days until open; `Some(0)` once open, `None` when unscheduled
    pub remaining_days: Option<u32>,
    pub unlock_at: Option<DateTime<Utc>>,
    pub reason: GateReason,
}

impl GateStatus {
    fn closed(reason: GateReason) -> Self {
        Self {
            open: false,
            remaining_days: None,
            unlock_at: None,
            reason,
        }
    }

    /// Fail-closed verdict when activation state is unknown
    pub fn unavailable() -> Self {
        Self::closed(GateReason::Unavailable)
    }
}

/// Instant the assessment unlocks for an activation timestamp
///
/// `None` when the instant is past the representable range.
pub fn unlock_at(activated_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    activated_at.checked_add_signed(Duration::days(POST_TEST_DELAY_DAYS))
}

/// Cohort-level gate, ignoring identifier activation
pub fn cohort_gate(cohort: &CohortActivation, now: DateTime<Utc>) -> GateStatus {
    if !cohort.activated {
        return GateStatus::closed(GateReason::NotScheduled);
    }
    // Active flag without a timestamp is inconsistent; stay closed
    let Some(activated_at) = cohort.activated_at else {
        return GateStatus::closed(GateReason::NotScheduled);
    };

    let unlock = unlock_at(activated_at);

    if cohort.released_at.is_some() {
        return GateStatus {
            open: true,
            remaining_days: Some(0),
            unlock_at: unlock,
            reason: GateReason::Released,
        };
    }

    // Unlock instant out of range: never reached
    let Some(unlock) = unlock else {
        return GateStatus {
            open: false,
            remaining_days: Some(u32::MAX),
            unlock_at: None,
            reason: GateReason::CountingDown,
        };
    };

    if now >= unlock {
        return GateStatus {
            open: true,
            remaining_days: Some(0),
            unlock_at: Some(unlock),
            reason: GateReason::Elapsed,
        };
    }

    GateStatus {
        open: false,
        remaining_days: Some(remaining_whole_days(unlock - now)),
        unlock_at: Some(unlock),
        reason: GateReason::CountingDown,
    }
}

/// Gate for one learner: cohort timing plus the activation policy
pub fn evaluate_gate(
    policy: ActivationPolicy,
    cohort: &CohortActivation,
    identifier: Option<&IdentifierActivation>,
    now: DateTime<Utc>,
) -> GateStatus {
    if !cohort.activated {
        return GateStatus::closed(GateReason::NotScheduled);
    }
    if !pairing_active(policy, cohort, identifier) {
        return GateStatus::closed(GateReason::IdentifierNotActivated);
    }
    cohort_gate(cohort, now)
}

/// ceil(remaining / 1 day), never below 1 while the gate is closed
fn remaining_whole_days(remaining: Duration) -> u32 {
    let millis = remaining.num_milliseconds().max(1);
    let days = (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY;
    u32::try_from(days).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap()
    }

    fn active_identifier() -> IdentifierActivation {
        IdentifierActivation {
            activated: true,
            activated_at: Some(now()),
        }
    }

    #[test]
    fn test_exact_boundary_is_open() {
        let cohort = CohortActivation::active_since(now() - Duration::days(27));
        let status = cohort_gate(&cohort, now());
        assert!(status.open);
        assert_eq!(status.remaining_days, Some(0));
        assert_eq!(status.reason, GateReason::Elapsed);
        assert_eq!(status.unlock_at, Some(now()));
    }

    #[test]
    fn test_one_second_short_is_closed_with_one_day() {
        let activated = now() - (Duration::days(26) + Duration::hours(23) + Duration::minutes(59) + Duration::seconds(59));
        let status = cohort_gate(&CohortActivation::active_since(activated), now());
        assert!(!status.open);
        assert_eq!(status.remaining_days, Some(1));
        assert_eq!(status.reason, GateReason::CountingDown);
    }

    #[test]
    fn test_fresh_activation_counts_full_delay() {
        let status = cohort_gate(&CohortActivation::active_since(now()), now());
        assert_eq!(status.remaining_days, Some(27));

        let status = cohort_gate(&CohortActivation::active_since(now() - Duration::hours(1)), now());
        assert_eq!(status.remaining_days, Some(27));

        let status = cohort_gate(&CohortActivation::active_since(now() - Duration::days(1)), now());
        assert_eq!(status.remaining_days, Some(26));
    }

    #[test]
    fn test_inactive_cohort_has_no_countdown() {
        let status = cohort_gate(&CohortActivation::inactive(), now());
        assert!(!status.open);
        assert_eq!(status.remaining_days, None);
        assert_eq!(status.reason, GateReason::NotScheduled);
    }

    #[test]
    fn test_flag_without_timestamp_stays_closed() {
        let cohort = CohortActivation {
            activated: true,
            activated_at: None,
            released_at: None,
        };
        assert!(!cohort_gate(&cohort, now()).open);
    }

    #[test]
    fn test_manual_release_opens_early() {
        let mut cohort = CohortActivation::active_since(now());
        cohort.released_at = Some(now());
        let status = cohort_gate(&cohort, now());
        assert!(status.open);
        assert_eq!(status.reason, GateReason::Released);
    }

    #[test]
    fn test_unrepresentable_unlock_stays_closed() {
        let cohort = CohortActivation::active_since(DateTime::<Utc>::MAX_UTC);
        let status = cohort_gate(&cohort, now());
        assert!(!status.open);
        assert_eq!(status.reason, GateReason::CountingDown);
        assert_eq!(status.remaining_days, Some(u32::MAX));
        assert_eq!(status.unlock_at, None);

        let status = evaluate_gate(ActivationPolicy::CohortImpliesRoster, &cohort, None, DateTime::<Utc>::MAX_UTC);
        assert!(!status.open);

        let mut released = cohort;
        released.released_at = Some(now());
        assert!(cohort_gate(&released, now()).open);
    }

    #[test]
    fn test_far_past_activation_is_open() {
        let cohort = CohortActivation::active_since(DateTime::<Utc>::MIN_UTC);
        let status = cohort_gate(&cohort, now());
        assert!(status.open);
        assert_eq!(status.reason, GateReason::Elapsed);
    }

    #[test]
    fn test_identifier_policy() {
        let cohort = CohortActivation::active_since(now() - Duration::days(30));

        let strict = evaluate_gate(ActivationPolicy::IdentifierRequired, &cohort, None, now());
        assert!(!strict.open);
        assert_eq!(strict.reason, GateReason::IdentifierNotActivated);

        let id = active_identifier();
        let strict = evaluate_gate(ActivationPolicy::IdentifierRequired, &cohort, Some(&id), now());
        assert!(strict.open);

        let lenient = evaluate_gate(ActivationPolicy::CohortImpliesRoster, &cohort, None, now());
        assert!(lenient.open);
    }

    #[test]
    fn test_identifier_active_but_cohort_not() {
        let id = active_identifier();
        let status = evaluate_gate(
            ActivationPolicy::IdentifierRequired,
            &CohortActivation::inactive(),
            Some(&id),
            now(),
        );
        assert_eq!(status.reason, GateReason::NotScheduled);
    }
}
