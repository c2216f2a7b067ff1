//! Status computation for `Mesh`.

use crate::crd::{
    derive_state, find_condition, set_condition, Condition, ConditionReason, ConditionStatus,
    ConditionType, MeshRevision, MeshStatus, RevisionSummary,
};
use chrono::{DateTime, Utc};
use kube::ResourceExt;

/// Copy a condition from the active revision. The mesh keeps its own transition times.
fn mirror(revision: &MeshRevision, r#type: ConditionType) -> Condition {
    let source = revision.condition(r#type);
    let mut condition = Condition::new(r#type, source.status).with_message(source.message);
    condition.reason = source.reason;
    condition
}

fn revision_not_found(r#type: ConditionType, name: &str) -> Condition {
    Condition::new(r#type, ConditionStatus::False)
        .with_reason(ConditionReason::RevisionNotFound)
        .with_message(format!("MeshRevision {name} not found"))
}

/// Count total, ready and in-use revisions.
#[must_use]
pub fn summarize(revisions: &[MeshRevision]) -> RevisionSummary {
    let count = |r#type| {
        let n = revisions
            .iter()
            .filter(|r| r.condition(r#type).is_true())
            .count();
        i32::try_from(n).unwrap_or(i32::MAX)
    };
    RevisionSummary {
        total: i32::try_from(revisions.len()).unwrap_or(i32::MAX),
        ready: count(ConditionType::Ready),
        in_use: count(ConditionType::InUse),
    }
}

/// Everything the mesh status is computed from
#[derive(Debug)]
pub struct MeshObservation<'a> {
    pub generation: Option<i64>,
    pub active_revision_name: &'a str,
    /// The active revision as last read, if it exists
    pub active: Option<&'a MeshRevision>,
    /// All revisions owned by the mesh (after pruning), `None` if they could not be listed
    pub owned: Option<&'a [MeshRevision]>,
    /// First error of the pass, which overrides the mirrored `Reconciled`
    pub error: Option<String>,
}

#[must_use]
pub fn next_status(
    current: Option<&MeshStatus>,
    observation: &MeshObservation<'_>,
    now: DateTime<Utc>,
) -> MeshStatus {
    let name = observation.active_revision_name;
    let (reconciled, ready) = match observation.active {
        Some(active) => (
            mirror(active, ConditionType::Reconciled),
            mirror(active, ConditionType::Ready),
        ),
        None => (
            revision_not_found(ConditionType::Reconciled, name),
            revision_not_found(ConditionType::Ready, name),
        ),
    };
    let reconciled = match &observation.error {
        Some(message) => Condition::new(ConditionType::Reconciled, ConditionStatus::False)
            .with_reason(ConditionReason::ReconcileError)
            .with_message(message.clone()),
        None => reconciled,
    };

    let mut conditions = current.map(|s| s.conditions.clone()).unwrap_or_default();
    conditions = set_condition(&conditions, reconciled, now);
    // Unknown revisions leave the last observed readiness and counts in place.
    if observation.owned.is_some() {
        conditions = set_condition(&conditions, ready, now);
    }
    let revisions = match observation.owned {
        Some(owned) => summarize(owned),
        None => current.map(|s| s.revisions).unwrap_or_default(),
    };

    let state = derive_state(
        &find_condition(&conditions, ConditionType::Reconciled),
        &find_condition(&conditions, ConditionType::Ready),
    );

    MeshStatus {
        observed_generation: observation.generation,
        conditions,
        state: Some(state),
        active_revision_name: Some(name.to_string()),
        revisions,
    }
}

/// Revisions in `all` controlled by the object with `owner_uid`.
#[must_use]
pub fn owned_by(all: Vec<MeshRevision>, owner_uid: &str) -> Vec<MeshRevision> {
    all.into_iter()
        .filter(|r| {
            r.owner_references()
                .iter()
                .any(|o| o.uid == owner_uid && o.controller == Some(true))
        })
        .collect()
}
