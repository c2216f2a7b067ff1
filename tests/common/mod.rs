//! Common test utilities for the controller integration tests
//!
//! - [`FakeCluster`]: an in-memory [`KubeClient`] with resource versions, finalizer
//!   semantics and injectable failures
//! - [`FakeHelm`]: a scripted [`HelmDriver`] that records every call
//! - [`Fixture`]: a resource tree on disk plus a [`Context`] wired to the fakes

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetStatus, Deployment, DeploymentSpec, DeploymentStatus,
};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::{PartialObjectMeta, PartialObjectMetaExt};
use mesh_operator::chart::{
    ChartError, ChartManager, ChartRequest, HelmDriver, Release, ReleaseStatus, UninstallOutcome,
};
use mesh_operator::client::{ClientError, KubeClient};
use mesh_operator::clock::FixedClock;
use mesh_operator::config::ControllerConfig;
use mesh_operator::constants::REVISION_FINALIZER;
use mesh_operator::controller::Context;
use mesh_operator::crd::{Mesh, MeshRevision, MeshSpec, UpdateStrategy, UpdateStrategyType};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;

/// Versions present in every fixture's resource tree
pub const VERSIONS: [&str; 3] = ["v1", "1.2.0", "1.3.0"];

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// In-memory cluster
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ClusterState {
    meshes: BTreeMap<String, Mesh>,
    revisions: BTreeMap<String, MeshRevision>,
    deployments: BTreeMap<(String, String), Deployment>,
    daemon_sets: BTreeMap<(String, String), DaemonSet>,
    namespaces: BTreeMap<String, Namespace>,
    pods: Vec<Pod>,
    counter: u64,
    status_conflicts: u32,
    unavailable_creates: u32,
    status_writes: u32,
    namespace_list_fails: bool,
    revision_list_fails: bool,
    revision_deletes_fail: bool,
}

impl ClusterState {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

/// In-memory stand-in for the API server
#[derive(Debug)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    clock: Arc<FixedClock>,
}

fn stale(kind: &str, name: &str) -> ClientError {
    ClientError::Conflict(format!(
        "Operation cannot be fulfilled on {kind} \"{name}\": the object has been modified"
    ))
}

impl FakeCluster {
    pub fn new(clock: Arc<FixedClock>) -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    fn admit(state: &mut ClusterState, meta: &mut ObjectMeta) {
        let n = state.next();
        meta.uid = Some(format!("uid-{n}"));
        meta.resource_version = Some(n.to_string());
        meta.generation = Some(1);
    }

    /// Store a mesh as if a user had created it.
    pub fn create_mesh(&self, mut mesh: Mesh) -> Mesh {
        let mut state = self.state();
        Self::admit(&mut state, &mut mesh.metadata);
        state.meshes.insert(mesh.metadata.name.clone().unwrap(), mesh.clone());
        mesh
    }

    /// Change a mesh's spec as a user would, bumping its generation.
    pub fn update_mesh_spec(&self, name: &str, update: impl FnOnce(&mut MeshSpec)) {
        let mut state = self.state();
        let rv = state.next();
        let mesh = state.meshes.get_mut(name).unwrap();
        update(&mut mesh.spec);
        mesh.metadata.generation = mesh.metadata.generation.map(|g| g + 1);
        mesh.metadata.resource_version = Some(rv.to_string());
    }

    pub fn mesh(&self, name: &str) -> Mesh {
        self.state().meshes.get(name).cloned().unwrap()
    }

    pub fn revision(&self, name: &str) -> Option<MeshRevision> {
        self.state().revisions.get(name).cloned()
    }

    pub fn revision_names(&self) -> Vec<String> {
        self.state().revisions.keys().cloned().collect()
    }

    /// Store a revision directly, bypassing the operator.
    pub fn insert_revision(&self, mut revision: MeshRevision) -> MeshRevision {
        let mut state = self.state();
        Self::admit(&mut state, &mut revision.metadata);
        state
            .revisions
            .insert(revision.metadata.name.clone().unwrap(), revision.clone());
        revision
    }

    /// Delete a revision as a user would.
    pub fn user_delete_revision(&self, name: &str) {
        let mut state = self.state();
        let rv = state.next();
        let now = self.clock_now();
        Self::delete_locked(&mut state, name, rv, now);
    }

    fn clock_now(&self) -> DateTime<Utc> {
        use mesh_operator::clock::Clock;
        self.clock.now()
    }

    fn delete_locked(state: &mut ClusterState, name: &str, rv: u64, now: DateTime<Utc>) {
        let Some(revision) = state.revisions.get_mut(name) else {
            return;
        };
        if revision.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
            revision.metadata.deletion_timestamp.get_or_insert(Time(now));
            revision.metadata.resource_version = Some(rv.to_string());
        } else {
            state.revisions.remove(name);
        }
    }

    /// Control plane Deployment with `ready` of `replicas` pods ready.
    pub fn set_deployment(&self, namespace: &str, name: &str, replicas: i32, ready: i32) {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(ready),
                ..Default::default()
            }),
        };
        self.state()
            .deployments
            .insert((namespace.into(), name.into()), deployment);
    }

    pub fn set_daemon_set(&self, namespace: &str, name: &str, scheduled: i32, ready: i32) {
        let daemon_set = DaemonSet {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            status: Some(DaemonSetStatus {
                desired_number_scheduled: scheduled,
                number_ready: ready,
                ..Default::default()
            }),
            ..Default::default()
        };
        self.state()
            .daemon_sets
            .insert((namespace.into(), name.into()), daemon_set);
    }

    pub fn add_namespace(&self, namespace: Namespace) {
        let name = namespace.metadata.name.clone().unwrap();
        self.state().namespaces.insert(name, namespace);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state().pods.push(pod);
    }

    pub fn clear_workloads(&self) {
        let mut state = self.state();
        state.namespaces.clear();
        state.pods.clear();
    }

    /// Fail the next `n` status writes with a conflict.
    pub fn inject_status_conflicts(&self, n: u32) {
        self.state().status_conflicts = n;
    }

    /// Fail the next `n` revision creates as if the API were still starting.
    pub fn inject_unavailable_creates(&self, n: u32) {
        self.state().unavailable_creates = n;
    }

    pub fn fail_namespace_list(&self, fail: bool) {
        self.state().namespace_list_fails = fail;
    }

    pub fn fail_revision_list(&self, fail: bool) {
        self.state().revision_list_fails = fail;
    }

    pub fn fail_revision_deletes(&self, fail: bool) {
        self.state().revision_deletes_fail = fail;
    }

    /// Number of status writes that were accepted
    pub fn status_writes(&self) -> u32 {
        self.state().status_writes
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_mesh(&self, name: &str) -> Result<Option<Mesh>, ClientError> {
        Ok(self.state().meshes.get(name).cloned())
    }

    async fn replace_mesh_status(&self, mesh: &Mesh) -> Result<(), ClientError> {
        let name = mesh.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            return Err(stale("meshes", &name));
        }
        let rv = state.next();
        let stored = state
            .meshes
            .get_mut(&name)
            .ok_or_else(|| ClientError::NotFound(name.clone()))?;
        if stored.metadata.resource_version != mesh.metadata.resource_version {
            return Err(stale("meshes", &name));
        }
        stored.status = mesh.status.clone();
        stored.metadata.resource_version = Some(rv.to_string());
        state.status_writes += 1;
        Ok(())
    }

    async fn get_revision(&self, name: &str) -> Result<Option<MeshRevision>, ClientError> {
        Ok(self.revision(name))
    }

    async fn list_revisions(&self) -> Result<Vec<MeshRevision>, ClientError> {
        let state = self.state();
        if state.revision_list_fails {
            return Err(ClientError::Unavailable("etcdserver: request timed out".into()));
        }
        Ok(state.revisions.values().cloned().collect())
    }

    async fn create_revision(&self, revision: &MeshRevision) -> Result<MeshRevision, ClientError> {
        let name = revision.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        if state.unavailable_creates > 0 {
            state.unavailable_creates -= 1;
            return Err(ClientError::Unavailable(
                "the server is currently unable to handle the request".into(),
            ));
        }
        if state.revisions.contains_key(&name) {
            return Err(ClientError::Conflict(format!(
                "meshrevisions \"{name}\" already exists"
            )));
        }
        let mut created = revision.clone();
        created.status = None;
        Self::admit(&mut state, &mut created.metadata);
        created.metadata.creation_timestamp = Some(Time(self.clock_now()));
        state.revisions.insert(name, created.clone());
        Ok(created)
    }

    async fn replace_revision(&self, revision: &MeshRevision) -> Result<MeshRevision, ClientError> {
        let name = revision.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        let rv = state.next();
        let stored = state
            .revisions
            .get_mut(&name)
            .ok_or_else(|| ClientError::NotFound(name.clone()))?;
        if stored.metadata.resource_version != revision.metadata.resource_version {
            return Err(stale("meshrevisions", &name));
        }
        if stored.spec != revision.spec {
            stored.metadata.generation = stored.metadata.generation.map(|g| g + 1);
        }
        stored.spec = revision.spec.clone();
        stored.metadata.owner_references = revision.metadata.owner_references.clone();
        stored.metadata.resource_version = Some(rv.to_string());
        Ok(stored.clone())
    }

    async fn delete_revision(&self, name: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        if state.revision_deletes_fail {
            return Err(ClientError::Api {
                code: 403,
                message: format!("meshrevisions \"{name}\" is forbidden"),
            });
        }
        let rv = state.next();
        Self::delete_locked(&mut state, name, rv, self.clock_now());
        Ok(())
    }

    async fn replace_revision_status(&self, revision: &MeshRevision) -> Result<(), ClientError> {
        let name = revision.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            return Err(stale("meshrevisions", &name));
        }
        let rv = state.next();
        let stored = state
            .revisions
            .get_mut(&name)
            .ok_or_else(|| ClientError::NotFound(name.clone()))?;
        if stored.metadata.resource_version != revision.metadata.resource_version {
            return Err(stale("meshrevisions", &name));
        }
        stored.status = revision.status.clone();
        stored.metadata.resource_version = Some(rv.to_string());
        state.status_writes += 1;
        Ok(())
    }

    async fn add_revision_finalizer(&self, name: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        let rv = state.next();
        let stored = state
            .revisions
            .get_mut(name)
            .ok_or_else(|| ClientError::NotFound(name.to_string()))?;
        let finalizers = stored.metadata.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == REVISION_FINALIZER) {
            finalizers.push(REVISION_FINALIZER.to_string());
            stored.metadata.resource_version = Some(rv.to_string());
        }
        Ok(())
    }

    async fn remove_revision_finalizer(&self, name: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        let rv = state.next();
        let Some(stored) = state.revisions.get_mut(name) else {
            return Ok(());
        };
        if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != REVISION_FINALIZER);
        }
        stored.metadata.resource_version = Some(rv.to_string());
        let released = stored.metadata.deletion_timestamp.is_some()
            && !stored.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty());
        if released {
            state.revisions.remove(name);
        }
        Ok(())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClientError> {
        Ok(self
            .state()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DaemonSet>, ClientError> {
        Ok(self
            .state()
            .daemon_sets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClientError> {
        let state = self.state();
        if state.namespace_list_fails {
            return Err(ClientError::Unavailable("etcdserver: request timed out".into()));
        }
        Ok(state.namespaces.values().cloned().collect())
    }

    async fn list_pod_metadata(&self) -> Result<Vec<PartialObjectMeta<Pod>>, ClientError> {
        Ok(self
            .state()
            .pods
            .iter()
            .map(|pod| pod.metadata.clone().into_response_partial())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Scripted helm
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HelmState {
    releases: BTreeMap<(String, String), Release>,
    calls: Vec<String>,
    requests: Vec<ChartRequest>,
}

/// Helm stand-in keeping releases in memory
#[derive(Debug, Default)]
pub struct FakeHelm {
    state: Mutex<HelmState>,
}

impl FakeHelm {
    fn state(&self) -> MutexGuard<'_, HelmState> {
        self.state.lock().unwrap()
    }

    /// Pretend a release already exists in the given state.
    pub fn set_release(&self, name: &str, namespace: &str, status: ReleaseStatus, version: u32) {
        self.state().releases.insert(
            (name.into(), namespace.into()),
            Release {
                name: name.into(),
                namespace: namespace.into(),
                status,
                version,
            },
        );
    }

    pub fn release(&self, name: &str, namespace: &str) -> Option<Release> {
        self.state()
            .releases
            .get(&(name.to_string(), namespace.to_string()))
            .cloned()
    }

    /// Calls made so far, as `"<verb> <release>"`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Install and upgrade requests made so far
    pub fn requests(&self) -> Vec<ChartRequest> {
        self.state().requests.clone()
    }

    fn record(&self, verb: &str, release: &str) {
        self.state().calls.push(format!("{verb} {release}"));
    }
}

#[async_trait]
impl HelmDriver for FakeHelm {
    async fn status(&self, release: &str, namespace: &str) -> Result<Option<Release>, ChartError> {
        Ok(self.release(release, namespace))
    }

    async fn install(&self, request: &ChartRequest) -> Result<Release, ChartError> {
        self.record("install", &request.release);
        if !request.chart_dir.is_dir() {
            return Err(ChartError::ChartNotFound(request.chart_dir.clone()));
        }
        let mut state = self.state();
        state.requests.push(request.clone());
        let release = Release {
            name: request.release.clone(),
            namespace: request.namespace.clone(),
            status: ReleaseStatus::Deployed,
            version: 1,
        };
        state.releases.insert(
            (request.release.clone(), request.namespace.clone()),
            release.clone(),
        );
        Ok(release)
    }

    async fn upgrade(&self, request: &ChartRequest) -> Result<Release, ChartError> {
        self.record("upgrade", &request.release);
        let mut state = self.state();
        state.requests.push(request.clone());
        let key = (request.release.clone(), request.namespace.clone());
        let version = state.releases.get(&key).map_or(1, |r| r.version + 1);
        let release = Release {
            name: request.release.clone(),
            namespace: request.namespace.clone(),
            status: ReleaseStatus::Deployed,
            version,
        };
        state.releases.insert(key, release.clone());
        Ok(release)
    }

    async fn rollback(&self, release: &str, namespace: &str) -> Result<(), ChartError> {
        self.record("rollback", release);
        let mut state = self.state();
        if let Some(existing) = state
            .releases
            .get_mut(&(release.to_string(), namespace.to_string()))
        {
            existing.status = ReleaseStatus::Deployed;
            existing.version += 1;
        }
        Ok(())
    }

    async fn uninstall(
        &self,
        release: &str,
        namespace: &str,
    ) -> Result<UninstallOutcome, ChartError> {
        self.record("uninstall", release);
        let removed = self
            .state()
            .releases
            .remove(&(release.to_string(), namespace.to_string()));
        Ok(if removed.is_some() {
            UninstallOutcome::Uninstalled
        } else {
            UninstallOutcome::NotFound
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Write `<version>/profiles/{default,demo}.yaml` and `<version>/charts/istiod/Chart.yaml`.
pub fn write_resource_tree(root: &Path) {
    for version in VERSIONS {
        let profiles = root.join(version).join("profiles");
        let chart = root.join(version).join("charts").join("istiod");
        std::fs::create_dir_all(&profiles).unwrap();
        std::fs::create_dir_all(&chart).unwrap();
        std::fs::write(
            profiles.join("default.yaml"),
            "apiVersion: mesh.octopilot.io/v1alpha1\n\
             kind: Mesh\n\
             spec:\n  values:\n    global:\n      hub: docker.io/istio\n      logging:\n        level: default:info\n    pilot:\n      replicaCount: 1\n      cni:\n        enabled: false\n",
        )
        .unwrap();
        std::fs::write(
            profiles.join("demo.yaml"),
            "spec:\n  values:\n    pilot:\n      replicaCount: 2\n      traceSampling: 100\n",
        )
        .unwrap();
        std::fs::write(
            chart.join("Chart.yaml"),
            format!("apiVersion: v2\nname: istiod\nversion: {version}\n"),
        )
        .unwrap();
    }
}

/// A resource tree on disk and a [`Context`] wired to in-memory fakes
#[derive(Debug)]
pub struct Fixture {
    pub cluster: Arc<FakeCluster>,
    pub helm: Arc<FakeHelm>,
    pub clock: Arc<FixedClock>,
    pub ctx: Context,
    pub resources: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let resources = tempfile::tempdir().unwrap();
        write_resource_tree(resources.path());

        let clock = Arc::new(FixedClock::new(t0()));
        let cluster = Arc::new(FakeCluster::new(Arc::clone(&clock)));
        let helm = Arc::new(FakeHelm::default());

        let root = resources.path().to_string_lossy().into_owned();
        let config = ControllerConfig::from_lookup(|key| match key {
            "RESOURCE_DIRECTORY" => Some(root.clone()),
            _ => None,
        });

        let ctx = Context::new(
            Arc::clone(&cluster) as Arc<dyn KubeClient>,
            ChartManager::new(Arc::clone(&helm) as Arc<dyn HelmDriver>),
            config,
            Arc::clone(&clock) as Arc<dyn mesh_operator::clock::Clock>,
        );

        Self {
            cluster,
            helm,
            clock,
            ctx,
            resources,
        }
    }

    pub fn advance(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

pub fn mesh(name: &str, version: &str, namespace: &str) -> Mesh {
    Mesh::new(
        name,
        MeshSpec {
            version: version.into(),
            namespace: namespace.into(),
            profile: None,
            values: None,
            update_strategy: None,
        },
    )
}

pub fn revision_based_mesh(name: &str, version: &str, namespace: &str, grace_secs: i64) -> Mesh {
    let mut mesh = mesh(name, version, namespace);
    mesh.spec.update_strategy = Some(UpdateStrategy {
        r#type: UpdateStrategyType::RevisionBased,
        inactive_revision_deletion_grace_period_seconds: Some(grace_secs),
    });
    mesh
}

fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    Some(
        pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

pub fn namespace(name: &str, label_pairs: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.into()),
            labels: labels(label_pairs),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn pod(namespace: &str, name: &str, label_pairs: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: labels(label_pairs),
            ..Default::default()
        },
        ..Default::default()
    }
}
