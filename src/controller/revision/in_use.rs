//! Whether any namespace or pod still selects a revision.
//!
//! A namespace selects `default` with `istio-injection=enabled`, otherwise the
//! revision named by its `istio.io/rev` label.
//!
//! A pod resolves to a revision by the first rule that applies:
//! 1. the `revision` recorded in its `sidecar.istio.io/status` annotation
//!    (the revision that actually injected it)
//! 2. its namespace's revision, unless the pod has `sidecar.istio.io/inject=false`
//! 3. its own `istio.io/rev` label
//! 4. `default` if it has `sidecar.istio.io/inject=true`

use crate::client::{ClientError, KubeClient};
use crate::constants::{
    DEFAULT_REVISION, INJECTION_LABEL, INJECTION_STATUS_ANNOTATION, POD_INJECT_LABEL,
    REVISION_LABEL, VALUES_INJECT_ALL_NAMESPACES_PATH,
};
use crate::crd::{Condition, ConditionReason, ConditionStatus, ConditionType, MeshRevision};
use k8s_openapi::api::core::v1::Namespace;
use kube::{Resource, ResourceExt};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct InjectionStatus {
    #[serde(default)]
    revision: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

/// Revision selected by a namespace's labels.
#[must_use]
pub fn namespace_revision(labels: &BTreeMap<String, String>) -> Option<&str> {
    if labels.get(INJECTION_LABEL).map(String::as_str) == Some("enabled") {
        return Some(DEFAULT_REVISION);
    }
    non_empty(labels.get(REVISION_LABEL))
}

/// Revision a pod belongs to, given the labels of its namespace. Only the pod's
/// metadata is read, so a full `Pod` and its `PartialObjectMeta` both work.
#[must_use]
pub fn pod_revision<P: Resource>(
    pod: &P,
    namespace_labels: &BTreeMap<String, String>,
) -> Option<String> {
    let injected_by = pod
        .annotations()
        .get(INJECTION_STATUS_ANNOTATION)
        .and_then(|status| serde_json::from_str::<InjectionStatus>(status).ok())
        .and_then(|status| status.revision)
        .filter(|r| !r.is_empty());
    if injected_by.is_some() {
        return injected_by;
    }

    let labels = pod.labels();
    let inject = labels.get(POD_INJECT_LABEL).map(String::as_str);
    if inject != Some("false") {
        if let Some(revision) = namespace_revision(namespace_labels) {
            return Some(revision.to_string());
        }
    }
    if let Some(revision) = non_empty(labels.get(REVISION_LABEL)) {
        return Some(revision.to_string());
    }
    (inject == Some("true")).then(|| DEFAULT_REVISION.to_string())
}

/// Whether `revision` is selected by any namespace or pod. Pods in namespaces
/// missing from `namespaces` are ignored.
#[must_use]
pub fn is_referenced<P: Resource>(revision: &str, namespaces: &[Namespace], pods: &[P]) -> bool {
    let labels_by_namespace: HashMap<String, &BTreeMap<String, String>> = namespaces
        .iter()
        .map(|ns| (ns.name_any(), ns.labels()))
        .collect();

    if labels_by_namespace
        .values()
        .any(|labels| namespace_revision(labels) == Some(revision))
    {
        return true;
    }

    pods.iter().any(|pod| {
        let Some(namespace_labels) = pod
            .namespace()
            .and_then(|ns| labels_by_namespace.get(&ns).copied())
        else {
            return false;
        };
        pod_revision(pod, namespace_labels).as_deref() == Some(revision)
    })
}

async fn evaluate(client: &dyn KubeClient, revision: &MeshRevision) -> Result<bool, ClientError> {
    let name = revision.name_any();

    if name == DEFAULT_REVISION
        && revision
            .spec
            .values
            .as_ref()
            .and_then(|v| v.get_bool(VALUES_INJECT_ALL_NAMESPACES_PATH))
            .unwrap_or(false)
    {
        debug!(revision = %name, "Injection enabled in all namespaces by default");
        return Ok(true);
    }

    let namespaces = client.list_namespaces().await?;
    let pods = client.list_pod_metadata().await?;
    Ok(is_referenced(&name, &namespaces, &pods))
}

/// The `InUse` condition for a revision. A failed lookup yields `Unknown`,
/// which keeps the revision from being pruned.
pub async fn in_use_condition(client: &dyn KubeClient, revision: &MeshRevision) -> Condition {
    match evaluate(client, revision).await {
        Ok(true) => Condition::new(ConditionType::InUse, ConditionStatus::True)
            .with_reason(ConditionReason::ReferencedByWorkloads)
            .with_message("Referenced by at least one namespace or pod"),
        Ok(false) => Condition::new(ConditionType::InUse, ConditionStatus::False)
            .with_reason(ConditionReason::NotReferenced)
            .with_message("Not referenced by any namespace or pod"),
        Err(e) => {
            warn!(revision = %revision.name_any(), error = %e, "Usage check failed");
            Condition::unknown(ConditionType::InUse)
                .with_reason(ConditionReason::UsageCheckFailed)
                .with_message(e.to_string())
        }
    }
}
