//! Readiness of the workloads a revision's chart installs.

use crate::client::{ClientError, KubeClient};
use crate::constants::{
    CONTROL_PLANE_DEPLOYMENT, DEFAULT_REVISION, NODE_AGENT_DAEMONSET,
    VALUES_NODE_AGENT_ENABLED_PATH,
};
use crate::crd::{Condition, ConditionReason, ConditionStatus, ConditionType, MeshRevision};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::ResourceExt;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady {
        reason: ConditionReason,
        message: String,
    },
}

impl Readiness {
    fn not_ready(reason: ConditionReason, message: impl Into<String>) -> Self {
        Readiness::NotReady {
            reason,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn into_condition(self) -> Condition {
        match self {
            Readiness::Ready => Condition::new(ConditionType::Ready, ConditionStatus::True),
            Readiness::NotReady { reason, message } => {
                Condition::new(ConditionType::Ready, ConditionStatus::False)
                    .with_reason(reason)
                    .with_message(message)
            }
        }
    }
}

/// Name of the control plane Deployment for a revision
#[must_use]
pub fn control_plane_deployment_name(revision: &str) -> String {
    if revision == DEFAULT_REVISION {
        CONTROL_PLANE_DEPLOYMENT.to_string()
    } else {
        format!("{CONTROL_PLANE_DEPLOYMENT}-{revision}")
    }
}

/// Readiness of the control plane Deployment. An unset replica count means 1.
#[must_use]
pub fn deployment_readiness(name: &str, deployment: Option<&Deployment>) -> Readiness {
    let Some(deployment) = deployment else {
        return Readiness::not_ready(
            ConditionReason::ControlPlaneNotFound,
            format!("Deployment {name} not found"),
        );
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    if desired == 0 {
        return Readiness::not_ready(
            ConditionReason::ControlPlaneScaledToZero,
            format!("Deployment {name} is scaled to zero replicas"),
        );
    }
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    if ready < desired {
        return Readiness::not_ready(
            ConditionReason::ControlPlaneNotReady,
            format!("{ready}/{desired} replicas of Deployment {name} are ready"),
        );
    }
    Readiness::Ready
}

/// Readiness of the node agent `DaemonSet`: every scheduled pod must be ready.
#[must_use]
pub fn daemon_set_readiness(daemon_set: Option<&DaemonSet>) -> Readiness {
    let Some(daemon_set) = daemon_set else {
        return Readiness::not_ready(
            ConditionReason::NodeAgentNotFound,
            format!("DaemonSet {NODE_AGENT_DAEMONSET} not found"),
        );
    };
    let (scheduled, ready) = daemon_set
        .status
        .as_ref()
        .map_or((0, 0), |s| (s.desired_number_scheduled, s.number_ready));
    if ready < scheduled {
        return Readiness::not_ready(
            ConditionReason::NodeAgentNotReady,
            format!("{ready}/{scheduled} pods of DaemonSet {NODE_AGENT_DAEMONSET} are ready"),
        );
    }
    Readiness::Ready
}

async fn evaluate(client: &dyn KubeClient, revision: &MeshRevision) -> Result<Readiness, ClientError> {
    let namespace = revision.spec.namespace.as_str();
    let name = control_plane_deployment_name(&revision.name_any());

    let deployment = client.get_deployment(namespace, &name).await?;
    let control_plane = deployment_readiness(&name, deployment.as_ref());
    if control_plane != Readiness::Ready {
        return Ok(control_plane);
    }

    let node_agent_enabled = revision
        .spec
        .values
        .as_ref()
        .and_then(|v| v.get_bool(VALUES_NODE_AGENT_ENABLED_PATH))
        .unwrap_or(false);
    if node_agent_enabled {
        let daemon_set = client.get_daemon_set(namespace, NODE_AGENT_DAEMONSET).await?;
        return Ok(daemon_set_readiness(daemon_set.as_ref()));
    }
    Ok(Readiness::Ready)
}

/// The `Ready` condition for a revision. A failed lookup yields `False`
/// with reason `ReadinessCheckFailed`.
pub async fn ready_condition(client: &dyn KubeClient, revision: &MeshRevision) -> Condition {
    match evaluate(client, revision).await {
        Ok(readiness) => readiness.into_condition(),
        Err(e) => {
            warn!(revision = %revision.name_any(), error = %e, "Readiness check failed");
            Condition::new(ConditionType::Ready, ConditionStatus::False)
                .with_reason(ConditionReason::ReadinessCheckFailed)
                .with_message(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{
        DaemonSetStatus, DeploymentSpec, DeploymentStatus,
    };

    fn deployment(replicas: Option<i32>, ready: Option<i32>) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas,
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn reason(readiness: Readiness) -> Option<ConditionReason> {
        match readiness {
            Readiness::Ready => None,
            Readiness::NotReady { reason, .. } => Some(reason),
        }
    }

    #[test]
    fn test_deployment_name() {
        assert_eq!(control_plane_deployment_name("default"), "istiod");
        assert_eq!(control_plane_deployment_name("canary"), "istiod-canary");
    }

    #[test]
    fn test_deployment_readiness() {
        assert_eq!(
            reason(deployment_readiness("istiod", None)),
            Some(ConditionReason::ControlPlaneNotFound)
        );
        assert_eq!(
            reason(deployment_readiness("istiod", Some(&deployment(Some(0), None)))),
            Some(ConditionReason::ControlPlaneScaledToZero)
        );
        assert_eq!(
            reason(deployment_readiness("istiod", Some(&deployment(Some(2), Some(1))))),
            Some(ConditionReason::ControlPlaneNotReady)
        );
        assert_eq!(
            deployment_readiness("istiod", Some(&deployment(Some(2), Some(2)))),
            Readiness::Ready
        );
        // replicas unset means one
        assert_eq!(
            reason(deployment_readiness("istiod", Some(&deployment(None, None)))),
            Some(ConditionReason::ControlPlaneNotReady)
        );
        assert_eq!(
            deployment_readiness("istiod", Some(&deployment(None, Some(1)))),
            Readiness::Ready
        );
    }

    #[test]
    fn test_daemon_set_readiness() {
        let ds = |scheduled, ready| DaemonSet {
            status: Some(DaemonSetStatus {
                desired_number_scheduled: scheduled,
                number_ready: ready,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            reason(daemon_set_readiness(None)),
            Some(ConditionReason::NodeAgentNotFound)
        );
        assert_eq!(
            reason(daemon_set_readiness(Some(&ds(3, 2)))),
            Some(ConditionReason::NodeAgentNotReady)
        );
        assert_eq!(daemon_set_readiness(Some(&ds(3, 3))), Readiness::Ready);
    }

    #[test]
    fn test_not_ready_condition_carries_message() {
        let condition = deployment_readiness("istiod-canary", None).into_condition();
        assert!(condition.is_false());
        assert_eq!(condition.message, "Deployment istiod-canary not found");
    }
}
