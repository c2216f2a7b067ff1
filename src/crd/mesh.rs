//! # Mesh
//!
//! The top-level desired state: which mesh version to run, where, and how new
//! versions are rolled out.

use crate::constants::{
    DEFAULT_INACTIVE_REVISION_GRACE_PERIOD_SECS, DEFAULT_MESH_NAMESPACE, DEFAULT_REVISION,
};
use crate::crd::status::{find_condition, Condition, ConditionReason, ConditionType};
use crate::values::Values;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Mesh Custom Resource Definition
///
/// Each `Mesh` produces exactly one active `MeshRevision`. Under the `InPlace`
/// strategy the revision carries the mesh's own name; under `RevisionBased` every
/// version gets its own revision and old ones are pruned once nothing uses them.
///
/// # Example
///
/// ```yaml
/// apiVersion: mesh.octopilot.io/v1alpha1
/// kind: Mesh
/// metadata:
///   name: default
/// spec:
///   version: v1.24.0
///   namespace: istio-system
///   profile: demo
///   updateStrategy:
///     type: RevisionBased
///     inactiveRevisionDeletionGracePeriodSeconds: 60
///   values:
///     pilot:
///       traceSampling: 0.1
/// ```
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Mesh",
    group = "mesh.octopilot.io",
    version = "v1alpha1",
    status = "MeshStatus",
    shortname = "mesh",
    printcolumn = r#"{"name":"Namespace", "type":"string", "jsonPath":".spec.namespace"}, {"name":"Version", "type":"string", "jsonPath":".spec.version"}, {"name":"Revisions", "type":"integer", "jsonPath":".status.revisions.total"}, {"name":"In Use", "type":"integer", "jsonPath":".status.revisions.inUse"}, {"name":"Active Revision", "type":"string", "jsonPath":".status.activeRevisionName"}, {"name":"Status", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MeshSpec {
    /// Mesh version to install; must match a directory in the resource tree
    pub version: String,
    /// Namespace the control plane is installed into
    #[serde(default = "default_mesh_namespace")]
    pub namespace: String,
    /// Optional profile applied on top of the built-in default profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Free-form chart values overriding the profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Values>,
    /// How version changes are rolled out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<UpdateStrategy>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    #[serde(default)]
    pub r#type: UpdateStrategyType,
    /// Seconds an unused revision is kept before it is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive_revision_deletion_grace_period_seconds: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum UpdateStrategyType {
    /// One revision named after the mesh, upgraded in place
    #[default]
    InPlace,
    /// One revision per version, side by side
    RevisionBased,
}

/// Default value for the target namespace
#[must_use]
pub fn default_mesh_namespace() -> String {
    DEFAULT_MESH_NAMESPACE.to_string()
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeshStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Reconciled and Ready, mirrored from the active revision
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Reason of the first failing condition, or Healthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ConditionReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_revision_name: Option<String>,
    #[serde(default)]
    pub revisions: RevisionSummary,
}

/// Counts over every revision owned by a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSummary {
    pub total: i32,
    pub ready: i32,
    pub in_use: i32,
}

impl MeshSpec {
    #[must_use]
    pub fn strategy(&self) -> UpdateStrategyType {
        self.update_strategy
            .as_ref()
            .map(|s| s.r#type)
            .unwrap_or_default()
    }

    /// Grace period for inactive revisions, never below `minimum_secs`.
    #[must_use]
    pub fn inactive_revision_grace_period(&self, minimum_secs: i64) -> chrono::Duration {
        let requested = self
            .update_strategy
            .as_ref()
            .and_then(|s| s.inactive_revision_deletion_grace_period_seconds)
            .unwrap_or(DEFAULT_INACTIVE_REVISION_GRACE_PERIOD_SECS);
        chrono::Duration::seconds(requested.max(minimum_secs))
    }
}

impl Mesh {
    /// Condition of the given type; `Unknown` when absent or when there is no status.
    #[must_use]
    pub fn condition(&self, r#type: ConditionType) -> Condition {
        self.status
            .as_ref()
            .map_or_else(
                || Condition::unknown(r#type),
                |s| find_condition(&s.conditions, r#type),
            )
    }
}

/// Name of the revision a mesh currently wants.
///
/// `InPlace` uses the mesh name; `RevisionBased` appends the version with dots
/// replaced so the result is a valid object name (`mesh` + `1.2.0` -> `mesh-1-2-0`).
#[must_use]
pub fn active_revision_name(mesh_name: &str, spec: &MeshSpec) -> String {
    match spec.strategy() {
        UpdateStrategyType::InPlace => mesh_name.to_string(),
        UpdateStrategyType::RevisionBased => {
            format!("{mesh_name}-{}", spec.version.replace('.', "-"))
        }
    }
}

/// The revision name written into chart values; empty for the default identity.
#[must_use]
pub fn values_revision_name(revision_name: &str) -> &str {
    if revision_name == DEFAULT_REVISION {
        ""
    } else {
        revision_name
    }
}
