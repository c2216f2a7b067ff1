//! # Revision Reconciler
//!
//! Installs the control plane chart for one `MeshRevision` and reports on it.
//!
//! ## Flow
//!
//! 1. Re-read the object; gone means nothing to do.
//! 2. Being deleted: uninstall the release, drop the finalizer, stop.
//! 3. No finalizer yet: add it and requeue immediately.
//! 4. Validate the spec, then converge the release (`<revision>-istiod`).
//! 5. Compute `Ready` from the control plane workloads and `InUse` from the
//!    namespaces and pods that select the revision.
//! 6. Write the status unless it is unchanged. A conflict requeues shortly.
//!
//! A validation or chart failure is still recorded in the status (`Reconciled=False`)
//! before being returned to the error policy.

mod in_use;
mod readiness;
mod status;
mod validation;

pub use in_use::{is_referenced, namespace_revision, pod_revision};
pub use readiness::{
    control_plane_deployment_name, daemon_set_readiness, deployment_readiness, Readiness,
};
pub use status::{next_status, reconciled_condition};
pub use validation::validate;

use super::{status_write_result, Context, StatusWrite};
use crate::chart::ChartRequest;
use crate::constants::{CONTROL_PLANE_CHART, REVISION_FINALIZER};
use crate::crd::{MeshRevision, MeshRevisionStatus};
use crate::error::{Error, Result};
use crate::ownership::OwnerStamp;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

pub const KIND: &str = "MeshRevision";

/// Name of the helm release for a revision
#[must_use]
pub fn release_name(revision: &str) -> String {
    format!("{revision}-{CONTROL_PLANE_CHART}")
}

/// Reconcile one `MeshRevision`.
///
/// # Errors
///
/// Returns the validation, chart or API error that stopped the pass.
pub async fn reconcile(revision: Arc<MeshRevision>, ctx: Arc<Context>) -> Result<Action> {
    let name = revision.name_any();
    let span = tracing::info_span!("revision.reconcile", revision.name = %name);
    reconcile_by_name(&name, &ctx).instrument(span).await
}

/// Reconcile the `MeshRevision` called `name`, reading it fresh from the cluster.
///
/// # Errors
///
/// Returns the validation, chart or API error that stopped the pass.
pub async fn reconcile_by_name(name: &str, ctx: &Context) -> Result<Action> {
    let Some(revision) = ctx.client.get_revision(name).await? else {
        debug!("MeshRevision no longer exists");
        return Ok(Action::await_change());
    };

    if revision.metadata.deletion_timestamp.is_some() {
        return finalize(&revision, ctx).await;
    }

    if !has_finalizer(&revision) {
        ctx.client.add_revision_finalizer(name).await?;
        info!(finalizer = REVISION_FINALIZER, "Added finalizer");
        return Ok(Action::requeue(Duration::ZERO));
    }

    let installed = install(&revision, ctx).await;
    if let Err(e) = &installed {
        warn!(error = %e, terminal = e.is_terminal(), "Failed to reconcile chart");
    }

    let ready = readiness::ready_condition(ctx.client.as_ref(), &revision).await;
    let in_use = in_use::in_use_condition(ctx.client.as_ref(), &revision).await;
    let status = next_status(
        revision.status.as_ref(),
        revision.metadata.generation,
        [
            reconciled_condition(installed.as_ref().map(|_| ())),
            ready,
            in_use,
        ],
        ctx.clock.now(),
    );

    let written = write_status(&revision, status, ctx).await;
    match (installed, written) {
        (Err(e), Err(write_err)) => {
            warn!(error = %write_err, "Failed to write status");
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
        (Ok(()), Err(write_err)) => Err(write_err),
        (Ok(()), Ok(StatusWrite::Conflict)) => Ok(Action::requeue(ctx.conflict_requeue(KIND, name))),
        (Ok(()), Ok(_)) => Ok(Action::await_change()),
    }
}

fn has_finalizer(revision: &MeshRevision) -> bool {
    revision.finalizers().iter().any(|f| f == REVISION_FINALIZER)
}

/// Validate and converge the release.
async fn install(revision: &MeshRevision, ctx: &Context) -> Result<()> {
    let name = revision.name_any();
    let values = validate(&name, &revision.spec)?;

    let version_dir = ctx.config.version_directory(&revision.spec.version);
    if !version_dir.is_dir() {
        return Err(Error::Validation(format!(
            "unsupported version {:?}",
            revision.spec.version
        )));
    }

    let request = ChartRequest {
        chart_dir: version_dir.join("charts").join(CONTROL_PLANE_CHART),
        release: release_name(&name),
        namespace: revision.spec.namespace.clone(),
        values: values.clone(),
        owner: OwnerStamp::for_resource(revision),
    };
    let release = ctx.charts.upgrade_or_install(&request).await?;
    info!(
        release = %release.name,
        release_version = release.version,
        release_status = %release.status,
        "Chart converged"
    );
    Ok(())
}

/// Uninstall the release and release the finalizer.
async fn finalize(revision: &MeshRevision, ctx: &Context) -> Result<Action> {
    if !has_finalizer(revision) {
        return Ok(Action::await_change());
    }
    let name = revision.name_any();

    if revision.spec.namespace.is_empty() {
        warn!("No namespace recorded, nothing to uninstall");
    } else {
        let outcome = ctx
            .charts
            .uninstall(&release_name(&name), &revision.spec.namespace)
            .await?;
        info!(?outcome, "Release removed");
    }

    ctx.client.remove_revision_finalizer(&name).await?;
    info!(finalizer = REVISION_FINALIZER, "Removed finalizer");
    Ok(Action::await_change())
}

async fn write_status(
    revision: &MeshRevision,
    status: MeshRevisionStatus,
    ctx: &Context,
) -> Result<StatusWrite> {
    if revision.status.as_ref() == Some(&status) {
        debug!("Status unchanged, skipping write");
        return Ok(StatusWrite::Unchanged);
    }
    let mut updated = revision.clone();
    updated.status = Some(status);
    status_write_result(
        ctx.client.replace_revision_status(&updated).await,
        KIND,
        &revision.name_any(),
    )
}
