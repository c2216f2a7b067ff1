//! # Cluster access
//!
//! [`KubeClient`] is the narrow set of API calls the reconcilers make. The
//! production implementation wraps a `kube::Client`; tests substitute a mock or an
//! in-memory fake.

use crate::cache::WorkloadCache;
use crate::constants::{CONTROLLER_NAME, REVISION_FINALIZER};
use crate::crd::{Mesh, MeshRevision};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::PartialObjectMeta;
use kube::{Api, Client, ResourceExt};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    /// Optimistic concurrency failure or an object that already exists
    #[error("conflict: {0}")]
    Conflict(String),
    /// The API server cannot take the request right now
    #[error("API server unavailable: {0}")]
    Unavailable(String),
    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("kubernetes client error: {0}")]
    Other(String),
}

impl ClientError {
    /// Classify an API status code.
    #[must_use]
    pub fn from_status(code: u16, message: String) -> Self {
        match code {
            404 => ClientError::NotFound(message),
            409 => ClientError::Conflict(message),
            429 | 500 | 503 | 504 => ClientError::Unavailable(message),
            _ => ClientError::Api { code, message },
        }
    }
}

impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) => {
                ClientError::from_status(api_err.code, api_err.message.clone())
            }
            other => ClientError::Other(other.to_string()),
        }
    }
}

/// Trait abstracting the Kubernetes calls made while reconciling
///
/// Reads of single objects return `Ok(None)` when the object does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get_mesh(&self, name: &str) -> Result<Option<Mesh>, ClientError>;

    /// Replace the status subresource with `mesh.status`. Fails with `Conflict`
    /// if `mesh` is stale.
    async fn replace_mesh_status(&self, mesh: &Mesh) -> Result<(), ClientError>;

    async fn get_revision(&self, name: &str) -> Result<Option<MeshRevision>, ClientError>;

    async fn list_revisions(&self) -> Result<Vec<MeshRevision>, ClientError>;

    /// Fails with `Conflict` if the name is taken
    async fn create_revision(&self, revision: &MeshRevision) -> Result<MeshRevision, ClientError>;

    /// Replace using the object's `resourceVersion`; fails with `Conflict` if stale
    async fn replace_revision(&self, revision: &MeshRevision)
        -> Result<MeshRevision, ClientError>;

    async fn delete_revision(&self, name: &str) -> Result<(), ClientError>;

    /// Replace the status subresource with `revision.status`. Fails with
    /// `Conflict` if `revision` is stale.
    async fn replace_revision_status(&self, revision: &MeshRevision) -> Result<(), ClientError>;

    async fn add_revision_finalizer(&self, name: &str) -> Result<(), ClientError>;

    async fn remove_revision_finalizer(&self, name: &str) -> Result<(), ClientError>;

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClientError>;

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DaemonSet>, ClientError>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClientError>;

    /// Metadata of pods across all namespaces
    async fn list_pod_metadata(&self) -> Result<Vec<PartialObjectMeta<Pod>>, ClientError>;
}

/// Production [`KubeClient`] backed by the API server
///
/// Namespace and pod reads go through a [`WorkloadCache`] when one is attached.
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
    cache: Option<WorkloadCache>,
}

impl KubeApiClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: None,
        }
    }

    #[must_use]
    pub fn with_workload_cache(mut self, cache: WorkloadCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn meshes(&self) -> Api<Mesh> {
        Api::all(self.client.clone())
    }

    fn revisions(&self) -> Api<MeshRevision> {
        Api::all(self.client.clone())
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
        resource_version: Option<String>,
    ) -> Result<(), ClientError> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": resource_version,
            }
        });
        self.revisions()
            .patch(name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Map a 404 to `None`.
async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>, ClientError>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KubeClient for KubeApiClient {
    async fn get_mesh(&self, name: &str) -> Result<Option<Mesh>, ClientError> {
        get_opt(self.meshes(), name).await
    }

    async fn replace_mesh_status(&self, mesh: &Mesh) -> Result<(), ClientError> {
        let body = serde_json::to_vec(mesh).map_err(|e| ClientError::Other(e.to_string()))?;
        self.meshes()
            .replace_status(&mesh.name_any(), &PostParams::default(), body)
            .await?;
        Ok(())
    }

    async fn get_revision(&self, name: &str) -> Result<Option<MeshRevision>, ClientError> {
        get_opt(self.revisions(), name).await
    }

    async fn list_revisions(&self) -> Result<Vec<MeshRevision>, ClientError> {
        Ok(self.revisions().list(&ListParams::default()).await?.items)
    }

    async fn create_revision(&self, revision: &MeshRevision) -> Result<MeshRevision, ClientError> {
        Ok(self
            .revisions()
            .create(&PostParams::default(), revision)
            .await?)
    }

    async fn replace_revision(
        &self,
        revision: &MeshRevision,
    ) -> Result<MeshRevision, ClientError> {
        let name = revision.metadata.name.clone().unwrap_or_default();
        Ok(self
            .revisions()
            .replace(&name, &PostParams::default(), revision)
            .await?)
    }

    async fn delete_revision(&self, name: &str) -> Result<(), ClientError> {
        match self.revisions().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_revision_status(&self, revision: &MeshRevision) -> Result<(), ClientError> {
        let body = serde_json::to_vec(revision).map_err(|e| ClientError::Other(e.to_string()))?;
        self.revisions()
            .replace_status(&revision.name_any(), &PostParams::default(), body)
            .await?;
        Ok(())
    }

    async fn add_revision_finalizer(&self, name: &str) -> Result<(), ClientError> {
        let revision = self.revisions().get(name).await?;
        let mut finalizers = revision.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == REVISION_FINALIZER) {
            return Ok(());
        }
        finalizers.push(REVISION_FINALIZER.to_string());
        self.patch_finalizers(name, finalizers, revision.metadata.resource_version)
            .await
    }

    async fn remove_revision_finalizer(&self, name: &str) -> Result<(), ClientError> {
        let Some(revision) = get_opt(self.revisions(), name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = revision
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != REVISION_FINALIZER)
            .collect();
        self.patch_finalizers(name, finalizers, revision.metadata.resource_version)
            .await
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClientError> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DaemonSet>, ClientError> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClientError> {
        if let Some(cache) = &self.cache {
            return cache.namespaces().await;
        }
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_pod_metadata(&self) -> Result<Vec<PartialObjectMeta<Pod>>, ClientError> {
        if let Some(cache) = &self.cache {
            return cache.pod_metadata().await;
        }
        let api: Api<Pod> = Api::all(self.client.clone());
        Ok(api.list_metadata(&ListParams::default()).await?.items)
    }
}
