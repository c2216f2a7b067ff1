//! # Chart Management
//!
//! Converges a helm release towards a chart + values, starting from whatever state
//! the previous attempt left it in.
//!
//! ## Decision table
//!
//! | Prior release state                              | Action                        |
//! |--------------------------------------------------|-------------------------------|
//! | none                                             | install                       |
//! | deployed                                         | upgrade                       |
//! | pending-upgrade, failed after an earlier deploy  | roll back, then upgrade       |
//! | pending-install, failed on first install         | uninstall, then install       |
//! | pending-rollback                                 | error (unrecoverable)         |
//! | uninstalled, uninstalling, superseded, unknown   | error (unexpected)            |
//!
//! The actual helm calls go through the [`HelmDriver`] trait; [`HelmCli`] is the
//! production implementation.

mod helm;
pub mod post_render;
mod release;

pub use helm::HelmCli;
pub use release::{Release, ReleaseStatus, UninstallOutcome};

use crate::observability;
use crate::ownership::OwnerStamp;
use crate::values::{Values, ValuesError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("release {release} is {status} and cannot be recovered automatically")]
    UnrecoverableState {
        release: String,
        status: ReleaseStatus,
    },
    #[error("release {release} is in unexpected state {status}")]
    UnexpectedState {
        release: String,
        status: ReleaseStatus,
    },
    #[error("chart directory {} does not exist", .0.display())]
    ChartNotFound(PathBuf),
    #[error("helm binary not found: {0}")]
    HelmNotFound(String),
    #[error("helm {command} failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("failed to run helm: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse helm output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Values(#[from] ValuesError),
}

impl ChartError {
    /// Release states that retrying will not fix.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChartError::UnrecoverableState { .. } | ChartError::UnexpectedState { .. }
        )
    }
}

/// Everything helm needs to install or upgrade one release
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRequest {
    pub chart_dir: PathBuf,
    pub release: String,
    pub namespace: String,
    pub values: Values,
    /// Ownership stamped onto every rendered object
    pub owner: Option<OwnerStamp>,
}

/// Trait abstracting helm operations
///
/// This trait allows mocking helm in tests while shelling out to the real
/// binary in production.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HelmDriver: Send + Sync {
    /// Current state of a release; `None` when helm has no record of it
    async fn status(&self, release: &str, namespace: &str) -> Result<Option<Release>, ChartError>;

    async fn install(&self, request: &ChartRequest) -> Result<Release, ChartError>;

    /// Upgrade keeping only the latest release revision, without touching CRDs
    async fn upgrade(&self, request: &ChartRequest) -> Result<Release, ChartError>;

    /// Roll back to the previous release revision
    async fn rollback(&self, release: &str, namespace: &str) -> Result<(), ChartError>;

    async fn uninstall(
        &self,
        release: &str,
        namespace: &str,
    ) -> Result<UninstallOutcome, ChartError>;
}

/// What to do with a release, given its prior state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    Install,
    Upgrade,
    RollbackThenUpgrade,
    UninstallThenInstall,
}

impl ReleaseAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseAction::Install => "install",
            ReleaseAction::Upgrade => "upgrade",
            ReleaseAction::RollbackThenUpgrade => "rollback-upgrade",
            ReleaseAction::UninstallThenInstall => "uninstall-install",
        }
    }
}

/// Decide the action for `release` from its prior state.
///
/// # Errors
///
/// Returns [`ChartError::UnrecoverableState`] for states only an operator can clear.
pub fn plan(release: &str, prior: Option<&Release>) -> Result<ReleaseAction, ChartError> {
    let Some(prior) = prior else {
        return Ok(ReleaseAction::Install);
    };
    match prior.status {
        ReleaseStatus::Deployed => Ok(ReleaseAction::Upgrade),
        ReleaseStatus::PendingUpgrade => Ok(ReleaseAction::RollbackThenUpgrade),
        ReleaseStatus::Failed if prior.version > 1 => Ok(ReleaseAction::RollbackThenUpgrade),
        ReleaseStatus::PendingInstall | ReleaseStatus::Failed => {
            Ok(ReleaseAction::UninstallThenInstall)
        }
        ReleaseStatus::PendingRollback => Err(ChartError::UnrecoverableState {
            release: release.to_string(),
            status: prior.status,
        }),
        status @ (ReleaseStatus::Superseded
        | ReleaseStatus::Uninstalled
        | ReleaseStatus::Uninstalling
        | ReleaseStatus::Unknown) => Err(ChartError::UnexpectedState {
            release: release.to_string(),
            status,
        }),
    }
}

/// Runs the decision table against a [`HelmDriver`].
#[derive(Clone)]
pub struct ChartManager {
    driver: Arc<dyn HelmDriver>,
}

impl std::fmt::Debug for ChartManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartManager").finish_non_exhaustive()
    }
}

impl ChartManager {
    #[must_use]
    pub fn new(driver: Arc<dyn HelmDriver>) -> Self {
        Self { driver }
    }

    /// Bring the release described by `request` to the deployed state.
    ///
    /// # Errors
    ///
    /// Returns the first failing helm call, or the planning error.
    pub async fn upgrade_or_install(&self, request: &ChartRequest) -> Result<Release, ChartError> {
        let prior = self
            .driver
            .status(&request.release, &request.namespace)
            .await?;
        let action = plan(&request.release, prior.as_ref())?;

        info!(
            release = request.release.as_str(),
            namespace = request.namespace.as_str(),
            prior_status = prior.as_ref().map_or("none", |r| r.status.as_str()),
            action = action.as_str(),
            "chart.converge"
        );
        observability::metrics::increment_chart_operations(action.as_str());

        match action {
            ReleaseAction::Install => self.driver.install(request).await,
            ReleaseAction::Upgrade => self.driver.upgrade(request).await,
            ReleaseAction::RollbackThenUpgrade => {
                warn!(
                    release = request.release.as_str(),
                    "Rolling back release left in a broken state before upgrading"
                );
                self.driver
                    .rollback(&request.release, &request.namespace)
                    .await?;
                self.driver.upgrade(request).await
            }
            ReleaseAction::UninstallThenInstall => {
                warn!(
                    release = request.release.as_str(),
                    "Removing release that never finished installing before reinstalling"
                );
                self.driver
                    .uninstall(&request.release, &request.namespace)
                    .await?;
                self.driver.install(request).await
            }
        }
    }

    /// Remove a release. Removing a release that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns any helm failure other than a missing release.
    pub async fn uninstall(
        &self,
        release: &str,
        namespace: &str,
    ) -> Result<UninstallOutcome, ChartError> {
        observability::metrics::increment_chart_operations("uninstall");
        let outcome = self.driver.uninstall(release, namespace).await?;
        info!(release, namespace, outcome = ?outcome, "chart.uninstall");
        Ok(outcome)
    }
}
