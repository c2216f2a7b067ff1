//! # Conditions
//!
//! Condition bookkeeping shared by `Mesh` and `MeshRevision` status.
//!
//! Conditions are a small ordered list keyed by type. [`set_condition`] is a pure
//! function from (list, new condition, now) to a new list so callers never mutate
//! a status in place while deciding what to write.

use chrono::{DateTime, SubsecRound, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a condition (True, False, Unknown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    /// The chart for the object was converged without error
    Reconciled,
    /// The control plane workloads are available
    Ready,
    /// Some namespace or pod still selects the revision (`MeshRevision` only)
    InUse,
}

/// Machine-readable reason codes. Also used as the derived `state` of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionReason {
    /// Everything is reconciled and ready
    Healthy,
    /// Validation, chart or cluster error while reconciling
    ReconcileError,
    /// The active `MeshRevision` does not exist (yet)
    RevisionNotFound,
    /// The control plane Deployment does not exist
    ControlPlaneNotFound,
    /// The control plane Deployment wants zero replicas
    ControlPlaneScaledToZero,
    /// Fewer control plane replicas are ready than desired
    ControlPlaneNotReady,
    /// The node agent `DaemonSet` is enabled but does not exist
    NodeAgentNotFound,
    /// The node agent `DaemonSet` has unready pods
    NodeAgentNotReady,
    /// Readiness could not be determined
    ReadinessCheckFailed,
    /// A namespace or pod references the revision
    ReferencedByWorkloads,
    /// No namespace or pod references the revision
    NotReferenced,
    /// Usage could not be determined
    UsageCheckFailed,
}

/// Condition represents an observation of one aspect of an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConditionReason>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    #[must_use]
    pub fn new(r#type: ConditionType, status: ConditionStatus) -> Self {
        Self {
            r#type,
            status,
            reason: None,
            message: String::new(),
            last_transition_time: None,
        }
    }

    #[must_use]
    pub fn unknown(r#type: ConditionType) -> Self {
        Self::new(r#type, ConditionStatus::Unknown)
    }

    #[must_use]
    pub fn with_reason(mut self, reason: ConditionReason) -> Self {
        self.reason = Some(reason);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    #[must_use]
    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}

/// Return the condition of the given type, or a synthesized `Unknown` one.
#[must_use]
pub fn find_condition(conditions: &[Condition], r#type: ConditionType) -> Condition {
    conditions
        .iter()
        .find(|c| c.r#type == r#type)
        .cloned()
        .unwrap_or_else(|| Condition::unknown(r#type))
}

/// Return `conditions` with `condition` recorded.
///
/// `lastTransitionTime` only moves when the status of that type changes; re-asserting
/// the same status keeps the previous timestamp even if reason or message changed.
/// New timestamps are truncated to whole seconds.
#[must_use]
pub fn set_condition(
    conditions: &[Condition],
    mut condition: Condition,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let now = now.trunc_subsecs(0);
    let mut updated = conditions.to_vec();

    match updated.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                Some(now)
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(now);
            updated.push(condition);
        }
    }
    updated
}

/// Collapse the `Reconciled` and `Ready` conditions into one state.
///
/// A reconcile failure always wins over a readiness failure.
#[must_use]
pub fn derive_state(reconciled: &Condition, ready: &Condition) -> ConditionReason {
    if reconciled.is_false() {
        reconciled.reason.unwrap_or(ConditionReason::ReconcileError)
    } else if ready.is_false() {
        ready.reason.unwrap_or(ConditionReason::ControlPlaneNotReady)
    } else {
        ConditionReason::Healthy
    }
}
