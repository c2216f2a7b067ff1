//! # Workload Cache
//!
//! Reflector-backed views of the namespaces and pods the usage check reads.
//!
//! Namespaces are cached whole; pods only as metadata (`metadata_watcher`),
//! since only their labels and annotations select a revision. Every
//! `MeshRevision` reconcile reads from these stores instead of listing the
//! cluster.
//!
//! Subscribers receive a signal when a namespace or pod is deleted, or when its
//! labels or annotations change. Status-only pod churn is not signalled.

use crate::client::ClientError;
use futures::channel::mpsc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::core::PartialObjectMeta;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{self, Store};
use kube_runtime::watcher::{self, Event};
use kube_runtime::{metadata_watcher, predicates, Predicate, WatchStreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Shared read side of the namespace and pod caches
#[derive(Clone)]
pub struct WorkloadCache {
    namespaces: Store<Namespace>,
    pods: Store<PartialObjectMeta<Pod>>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<()>>>>,
}

impl std::fmt::Debug for WorkloadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadCache")
            .field("namespaces", &self.namespaces.state().len())
            .field("pods", &self.pods.state().len())
            .finish_non_exhaustive()
    }
}

impl WorkloadCache {
    /// Start watching namespaces and pod metadata in the background.
    ///
    /// The watches live as long as the process; controllers restarted by the
    /// watch loop re-subscribe to the same cache.
    #[must_use]
    pub fn start(client: &Client) -> Self {
        let (namespaces, namespace_writer) = reflector::store();
        let (pods, pod_writer) = reflector::store();
        let cache = Self {
            namespaces,
            pods,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        };
        tokio::spawn(
            cache
                .clone()
                .maintain(client.clone(), namespace_writer, pod_writer),
        );
        cache
    }

    /// All namespaces, once the first listing has completed
    ///
    /// # Errors
    ///
    /// Fails when the cache is dropped before its first listing completes.
    pub async fn namespaces(&self) -> Result<Vec<Namespace>, ClientError> {
        self.namespaces
            .wait_until_ready()
            .await
            .map_err(|e| ClientError::Unavailable(format!("namespace cache: {e}")))?;
        Ok(self
            .namespaces
            .state()
            .iter()
            .map(|ns| ns.as_ref().clone())
            .collect())
    }

    /// Metadata of every pod, once the first listing has completed
    ///
    /// # Errors
    ///
    /// Fails when the cache is dropped before its first listing completes.
    pub async fn pod_metadata(&self) -> Result<Vec<PartialObjectMeta<Pod>>, ClientError> {
        self.pods
            .wait_until_ready()
            .await
            .map_err(|e| ClientError::Unavailable(format!("pod cache: {e}")))?;
        Ok(self.pods.state().iter().map(|p| p.as_ref().clone()).collect())
    }

    /// A stream that yields whenever workload selections may have changed.
    ///
    /// Signals coalesce: a subscriber that has not consumed the previous signal
    /// does not get a second one.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(0);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn notify(&self) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain_mut(|tx| match tx.try_send(()) {
            Ok(()) => true,
            Err(e) => !e.is_disconnected(),
        });
    }

    async fn maintain(
        self,
        client: Client,
        namespace_writer: Writer<Namespace>,
        pod_writer: Writer<PartialObjectMeta<Pod>>,
    ) {
        let mut namespace_tracker = SelectionTracker::default();
        let namespaces = watcher::watcher(
            Api::<Namespace>::all(client.clone()),
            watcher::Config::default(),
        )
            .default_backoff()
            .reflect(namespace_writer)
            .map(move |event| event.map(|e| namespace_tracker.observe(&e)));

        let mut pod_tracker = SelectionTracker::default();
        let pods = metadata_watcher(Api::<Pod>::all(client), watcher::Config::default())
            .default_backoff()
            .reflect(pod_writer)
            .map(move |event| event.map(|e| pod_tracker.observe(&e)));

        let mut changes = std::pin::pin!(futures::stream::select(namespaces, pods));
        while let Some(change) = changes.next().await {
            match change {
                Ok(true) => self.notify(),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Workload watch failed, retrying"),
            }
        }
        debug!("Workload watches ended");
    }
}

/// Remembers a hash of the labels and annotations of every object seen, so only
/// changes to what selects a revision are reported.
#[derive(Debug, Default)]
pub struct SelectionTracker {
    seen: HashMap<(Option<String>, String), u64>,
}

impl SelectionTracker {
    /// Record a watch event and report whether selections may have changed.
    pub fn observe<K: Resource>(&mut self, event: &Event<K>) -> bool {
        match event {
            Event::Apply(obj) => self.record(obj),
            // A relist re-applies everything; `InitDone` reports it once.
            Event::InitApply(obj) => {
                self.record(obj);
                false
            }
            Event::Delete(obj) => {
                self.seen.remove(&key(obj));
                true
            }
            Event::Init => false,
            Event::InitDone => true,
        }
    }

    fn record<K: Resource>(&mut self, obj: &K) -> bool {
        let hash = predicates::labels::<K>
            .combine(predicates::annotations::<K>)
            .hash_property(obj)
            .unwrap_or_default();
        self.seen.insert(key(obj), hash) != Some(hash)
    }
}

fn key<K: Resource>(obj: &K) -> (Option<String>, String) {
    (obj.namespace(), obj.name_any())
}
