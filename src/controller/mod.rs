//! # Controller
//!
//! Reconciliation logic for the two custom resources.
//!
//! - `mesh`: the orchestrator that turns a `Mesh` into `MeshRevision`s and prunes old ones
//! - `revision`: installs the chart for a `MeshRevision` and reports readiness and usage
//! - `backoff`: Fibonacci backoff for failed reconciliations

pub mod backoff;
pub mod mesh;
pub mod revision;

use crate::chart::ChartManager;
use crate::client::{ClientError, KubeClient};
use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::observability;
use backoff::BackoffRegistry;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Shared state handed to every reconcile
pub struct Context {
    pub client: Arc<dyn KubeClient>,
    pub charts: ChartManager,
    pub config: ControllerConfig,
    pub clock: Arc<dyn Clock>,
    /// Per-object error backoff, shared by both controllers (names are keyed by kind)
    pub backoff: BackoffRegistry,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Context {
    #[must_use]
    pub fn new(
        client: Arc<dyn KubeClient>,
        charts: ChartManager,
        config: ControllerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let backoff = BackoffRegistry::new(config.backoff_min_secs, config.backoff_max_secs);
        Self {
            client,
            charts,
            config,
            clock,
            backoff,
        }
    }

    /// Record a write conflict and return how long to wait before retrying
    fn conflict_requeue(&self, kind: &str, name: &str) -> Duration {
        info!(
            kind,
            name,
            requeue_secs = self.config.conflict_requeue_secs,
            "Write conflict, requeueing"
        );
        observability::metrics::increment_requeues_total("conflict");
        self.config.conflict_requeue()
    }
}

/// Outcome of writing a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusWrite {
    Unchanged,
    Written,
    /// Someone else updated the object first
    Conflict,
}

/// Map the result of a status replace: conflicts are transient, not errors.
pub(crate) fn status_write_result(
    result: std::result::Result<(), ClientError>,
    kind: &str,
    name: &str,
) -> Result<StatusWrite> {
    match result {
        Ok(()) => {
            debug!(kind, name, "Status updated");
            Ok(StatusWrite::Written)
        }
        Err(ClientError::Conflict(message)) => {
            debug!(kind, name, %message, "Status write conflicted");
            Ok(StatusWrite::Conflict)
        }
        Err(e) => Err(Error::Client(e)),
    }
}

/// The earlier of two optional requeues; `None` means "wait for a change".
pub(crate) fn earliest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

pub(crate) fn action_from(requeue: Option<Duration>) -> Action {
    requeue.map_or_else(Action::await_change, Action::requeue)
}
