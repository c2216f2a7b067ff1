//! # `MeshRevision`
//!
//! A concrete, versioned control plane install derived from a `Mesh`.

use crate::constants::{DEFAULT_REVISION, VALUES_REVISION_PATH};
use crate::crd::status::{find_condition, Condition, ConditionReason, ConditionType};
use crate::values::Values;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `MeshRevision` Custom Resource Definition
///
/// Created and owned by a `Mesh`. Its `values` are fully resolved; the revision
/// controller hands them to the chart unchanged.
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "MeshRevision",
    group = "mesh.octopilot.io",
    version = "v1alpha1",
    status = "MeshRevisionStatus",
    shortname = "meshrev",
    printcolumn = r#"{"name":"Namespace", "type":"string", "jsonPath":".spec.namespace"}, {"name":"Version", "type":"string", "jsonPath":".spec.version"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"In Use", "type":"string", "jsonPath":".status.conditions[?(@.type==\"InUse\")].status"}, {"name":"Status", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MeshRevisionSpec {
    pub version: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Values>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeshRevisionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// `Reconciled`, `Ready` and `InUse`
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ConditionReason>,
}

impl MeshRevision {
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

impl MeshRevisionSpec {
    /// The identity sidecars use to select this revision: the `revision` value,
    /// or `default` when it is unset.
    #[must_use]
    pub fn revision_key(&self) -> &str {
        self.values
            .as_ref()
            .and_then(|v| v.get_str(VALUES_REVISION_PATH))
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REVISION)
    }
}
