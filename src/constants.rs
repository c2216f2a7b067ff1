//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! Durations here are defaults; most of them can be overridden through
//! [`ControllerConfig`](crate::config::ControllerConfig).

/// API group of the operator's custom resources
pub const API_GROUP: &str = "mesh.octopilot.io";

/// Field manager / controller name used for server-side bookkeeping
pub const CONTROLLER_NAME: &str = "mesh-operator";

/// Finalizer placed on every `MeshRevision` so its release is uninstalled on deletion
pub const REVISION_FINALIZER: &str = "mesh.octopilot.io/finalizer";

/// Annotation holding `<namespace>/<name>` of the owner of a cross-namespace object
pub const MANAGED_BY_NAME_ANNOTATION: &str = "mesh.octopilot.io/managed-by-name";

/// Annotation holding `<Kind>.<group>` of the owner of a cross-namespace object
pub const MANAGED_BY_KIND_ANNOTATION: &str = "mesh.octopilot.io/managed-by-kind";

/// The distinguished revision identity that needs no explicit revision label
pub const DEFAULT_REVISION: &str = "default";

/// Chart installed for every revision, relative to `<version>/charts/`
pub const CONTROL_PLANE_CHART: &str = "istiod";

/// Name of the control plane Deployment for the default revision
pub const CONTROL_PLANE_DEPLOYMENT: &str = "istiod";

/// Name of the node agent `DaemonSet` that must be ready when enabled
pub const NODE_AGENT_DAEMONSET: &str = "istio-cni-node";

/// Default target namespace for a `Mesh` that does not set one
pub const DEFAULT_MESH_NAMESPACE: &str = "istio-system";

// Values paths

/// Path of the target namespace inside a values document
pub const VALUES_NAMESPACE_PATH: &str = "global.istioNamespace";

/// Path of the revision name inside a values document
pub const VALUES_REVISION_PATH: &str = "revision";

/// Path of the "inject into every namespace" switch inside a values document
pub const VALUES_INJECT_ALL_NAMESPACES_PATH: &str = "sidecarInjectorWebhook.enableNamespacesByDefault";

/// Path of the node agent switch inside a values document
pub const VALUES_NODE_AGENT_ENABLED_PATH: &str = "pilot.cni.enabled";

// Injection labels and annotations

/// Namespace label enabling injection by the default revision (`enabled`)
pub const INJECTION_LABEL: &str = "istio-injection";

/// Namespace or pod label naming the revision that should inject
pub const REVISION_LABEL: &str = "istio.io/rev";

/// Pod label opting a pod in (`true`) or out (`false`) of injection
pub const POD_INJECT_LABEL: &str = "sidecar.istio.io/inject";

/// Pod annotation written by the injector, recording which revision injected it
pub const INJECTION_STATUS_ANNOTATION: &str = "sidecar.istio.io/status";

// Requeue and timing defaults

/// Requeue delay after an optimistic-concurrency conflict (seconds)
pub const DEFAULT_CONFLICT_REQUEUE_SECS: u64 = 2;

/// Requeue delay when the API server is not ready to accept a create (seconds)
pub const DEFAULT_NOT_READY_REQUEUE_SECS: u64 = 30;

/// Grace period applied when a `Mesh` does not set one (seconds)
pub const DEFAULT_INACTIVE_REVISION_GRACE_PERIOD_SECS: i64 = 30;

/// Lower bound on the inactive revision grace period (seconds)
pub const MIN_INACTIVE_REVISION_GRACE_PERIOD_SECS: i64 = 30;

/// Fibonacci backoff lower bound for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Fibonacci backoff upper bound for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Delay before restarting a watch stream that ended (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default location of the versioned chart/profile tree
pub const DEFAULT_RESOURCE_DIRECTORY: &str = "/var/lib/mesh-operator/resources";

/// Profile always applied before the `Mesh`'s own profile
pub const DEFAULT_PROFILE: &str = "default";
