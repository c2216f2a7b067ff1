//! Pruning of inactive revisions.
//!
//! A revision other than the active one becomes eligible for deletion once its
//! `InUse` condition has been `False` for longer than the grace period. Revisions
//! whose usage is `True` or still `Unknown` are kept.

use crate::crd::{ConditionType, MeshRevision};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    /// Revisions to delete now
    pub delete: Vec<String>,
    /// Time until the next revision becomes eligible, one second past its deadline
    pub requeue_after: Option<Duration>,
}

/// Decide which of a mesh's revisions to delete at `now`.
#[must_use]
pub fn plan_pruning(
    revisions: &[MeshRevision],
    active: &str,
    grace_period: chrono::Duration,
    now: DateTime<Utc>,
) -> PrunePlan {
    let mut plan = PrunePlan::default();
    let mut earliest_deadline: Option<DateTime<Utc>> = None;

    for revision in revisions {
        let name = revision.name_any();
        if name == active || revision.metadata.deletion_timestamp.is_some() {
            continue;
        }
        let in_use = revision.condition(ConditionType::InUse);
        if !in_use.is_false() {
            continue;
        }
        let Some(unused_since) = in_use.last_transition_time else {
            continue;
        };
        let deadline = unused_since + grace_period;
        if now > deadline {
            plan.delete.push(name);
        } else {
            earliest_deadline = Some(earliest_deadline.map_or(deadline, |d| d.min(deadline)));
        }
    }

    plan.requeue_after = earliest_deadline
        .and_then(|deadline| (deadline - now + chrono::Duration::seconds(1)).to_std().ok());
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Condition, ConditionStatus, MeshRevisionSpec, MeshRevisionStatus};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn revision(name: &str, in_use: ConditionStatus, since: DateTime<Utc>) -> MeshRevision {
        let mut rev = MeshRevision::new(
            name,
            MeshRevisionSpec {
                version: "v1".into(),
                namespace: "istio-system".into(),
                values: None,
            },
        );
        let mut condition = Condition::new(ConditionType::InUse, in_use);
        condition.last_transition_time = Some(since);
        rev.status = Some(MeshRevisionStatus {
            conditions: vec![condition],
            ..Default::default()
        });
        rev
    }

    #[test]
    fn test_expired_revision_is_deleted() {
        let revisions = vec![
            revision("mesh", ConditionStatus::False, t0()),
            revision("mesh-1-2-0", ConditionStatus::False, t0()),
        ];
        let plan = plan_pruning(
            &revisions,
            "mesh",
            chrono::Duration::seconds(30),
            t0() + chrono::Duration::seconds(31),
        );
        assert_eq!(plan.delete, vec!["mesh-1-2-0".to_string()]);
        assert_eq!(plan.requeue_after, None);
    }

    #[test]
    fn test_revision_at_its_deadline_is_kept() {
        let revisions = vec![revision("mesh-1-2-0", ConditionStatus::False, t0())];
        let plan = plan_pruning(
            &revisions,
            "mesh",
            chrono::Duration::seconds(30),
            t0() + chrono::Duration::seconds(30),
        );
        assert!(plan.delete.is_empty());
        assert_eq!(plan.requeue_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_recent_revision_requeues_just_past_deadline() {
        let revisions = vec![
            revision("old-a", ConditionStatus::False, t0()),
            revision("old-b", ConditionStatus::False, t0() - chrono::Duration::seconds(20)),
        ];
        let plan = plan_pruning(
            &revisions,
            "mesh",
            chrono::Duration::seconds(60),
            t0() + chrono::Duration::seconds(10),
        );
        assert!(plan.delete.is_empty());
        // old-b's grace period ends at t0+40s, 30s from now
        assert_eq!(plan.requeue_after, Some(Duration::from_secs(31)));
    }

    #[test]
    fn test_in_use_and_unknown_revisions_are_kept() {
        let mut unknown = revision("unknown", ConditionStatus::False, t0());
        unknown.status = None;
        let revisions = vec![
            revision("used", ConditionStatus::True, t0() - chrono::Duration::days(1)),
            unknown,
        ];
        let plan = plan_pruning(
            &revisions,
            "mesh",
            chrono::Duration::seconds(30),
            t0() + chrono::Duration::days(1),
        );
        assert_eq!(plan, PrunePlan::default());
    }

    #[test]
    fn test_active_revision_is_never_pruned() {
        let revisions = vec![revision("mesh", ConditionStatus::False, t0())];
        let plan = plan_pruning(
            &revisions,
            "mesh",
            chrono::Duration::seconds(30),
            t0() + chrono::Duration::days(1),
        );
        assert!(plan.delete.is_empty());
    }
}
