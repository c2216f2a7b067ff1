//! Status computation for `MeshRevision`.

use crate::crd::{
    derive_state, find_condition, set_condition, Condition, ConditionReason, ConditionStatus,
    ConditionType, MeshRevisionStatus,
};
use crate::error::Error;
use chrono::{DateTime, Utc};

/// The `Reconciled` condition for the outcome of installing the chart.
#[must_use]
pub fn reconciled_condition(outcome: Result<(), &Error>) -> Condition {
    match outcome {
        Ok(()) => Condition::new(ConditionType::Reconciled, ConditionStatus::True),
        Err(e) => Condition::new(ConditionType::Reconciled, ConditionStatus::False)
            .with_reason(ConditionReason::ReconcileError)
            .with_message(e.to_string()),
    }
}

/// Compute the next status from the stored one and freshly observed conditions.
#[must_use]
pub fn next_status(
    current: Option<&MeshRevisionStatus>,
    generation: Option<i64>,
    observed: [Condition; 3],
    now: DateTime<Utc>,
) -> MeshRevisionStatus {
    let mut conditions = current.map(|s| s.conditions.clone()).unwrap_or_default();
    for condition in observed {
        conditions = set_condition(&conditions, condition, now);
    }
    let state = derive_state(
        &find_condition(&conditions, ConditionType::Reconciled),
        &find_condition(&conditions, ConditionType::Ready),
    );
    MeshRevisionStatus {
        observed_generation: generation,
        conditions,
        state: Some(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn observed(ready: bool) -> [Condition; 3] {
        [
            reconciled_condition(Ok(())),
            Condition::new(ConditionType::Ready, ConditionStatus::from_bool(ready))
                .with_reason(ConditionReason::ControlPlaneNotReady),
            Condition::new(ConditionType::InUse, ConditionStatus::False),
        ]
    }

    #[test]
    fn test_recomputing_identical_status_is_stable() {
        let first = next_status(None, Some(3), observed(true), now());
        let second = next_status(
            Some(&first),
            Some(3),
            observed(true),
            now() + chrono::Duration::minutes(5),
        );
        assert_eq!(first, second);
        assert_eq!(second.state, Some(ConditionReason::Healthy));
    }

    #[test]
    fn test_reconcile_failure_drives_state() {
        let err = Error::Validation("spec.version not set".into());
        let status = next_status(
            None,
            Some(1),
            [
                reconciled_condition(Err(&err)),
                Condition::new(ConditionType::Ready, ConditionStatus::False)
                    .with_reason(ConditionReason::ControlPlaneNotFound),
                Condition::unknown(ConditionType::InUse),
            ],
            now(),
        );
        assert_eq!(status.state, Some(ConditionReason::ReconcileError));
        let reconciled = find_condition(&status.conditions, ConditionType::Reconciled);
        assert_eq!(reconciled.message, "invalid resource: spec.version not set");
    }
}
