//! # Mesh Orchestrator
//!
//! Turns a `Mesh` into its active `MeshRevision`, prunes revisions nothing uses
//! any more, and mirrors the active revision's status.
//!
//! ## Flow
//!
//! 1. Re-read the object; gone or being deleted means nothing to do (owned
//!    revisions are garbage collected).
//! 2. Validate `version` and `namespace`, and that the version is installed.
//! 3. Resolve values: `default` profile, then `spec.profile`, then `spec.values`,
//!    with the namespace and revision name forced to match.
//! 4. Create or update the active revision, adopting it if nothing controls it.
//! 5. Delete inactive revisions whose grace period has run out, and requeue for
//!    the next deadline.
//! 6. Write the status unless it is unchanged.
//!
//! The returned action is the earliest of all requeues the steps asked for. A
//! failing step does not stop the status write; the first error is returned
//! after it.

mod prune;
mod status;

pub use prune::{plan_pruning, PrunePlan};
pub use status::{next_status, owned_by, summarize, MeshObservation};

use super::{action_from, earliest, revision, status_write_result, Context, StatusWrite};
use crate::client::ClientError;
use crate::constants::{VALUES_NAMESPACE_PATH, VALUES_REVISION_PATH};
use crate::crd::{
    active_revision_name, values_revision_name, Mesh, MeshRevision, MeshRevisionSpec, MeshSpec,
    MeshStatus,
};
use crate::error::{Error, Result};
use crate::observability;
use crate::values::{resolve_values, Values};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

pub const KIND: &str = "Mesh";

/// Reconcile one `Mesh`.
///
/// # Errors
///
/// Returns the first error of the pass, after the status has been written.
pub async fn reconcile(mesh: Arc<Mesh>, ctx: Arc<Context>) -> Result<Action> {
    let name = mesh.name_any();
    let span = tracing::info_span!("mesh.reconcile", mesh.name = %name);
    reconcile_by_name(&name, &ctx).instrument(span).await
}

/// Reconcile the `Mesh` called `name`, reading it fresh from the cluster.
///
/// # Errors
///
/// Returns the first error of the pass, after the status has been written.
pub async fn reconcile_by_name(name: &str, ctx: &Context) -> Result<Action> {
    let Some(mesh) = ctx.client.get_mesh(name).await? else {
        debug!("Mesh no longer exists");
        return Ok(Action::await_change());
    };
    if mesh.metadata.deletion_timestamp.is_some() {
        debug!("Mesh is being deleted, leaving revisions to garbage collection");
        return Ok(Action::await_change());
    }

    let active_name = active_revision_name(name, &mesh.spec);
    let (mut requeue, mut failure) = match apply_active_revision(&mesh, &active_name, ctx).await {
        Ok(requeue) => (requeue, None),
        Err(e) => {
            warn!(error = %e, terminal = e.is_terminal(), "Failed to apply active revision");
            (None, Some(e))
        }
    };

    let owner_uid = mesh.uid().unwrap_or_default();
    let mut owned = match ctx.client.list_revisions().await {
        Ok(all) => Some(owned_by(all, &owner_uid)),
        Err(e) => {
            warn!(error = %e, "Failed to list revisions");
            record(&mut failure, e.into());
            None
        }
    };

    // Without a trustworthy active revision and revision list nothing is pruned.
    if let Some(owned) = owned.as_mut().filter(|_| failure.is_none()) {
        let grace = mesh
            .spec
            .inactive_revision_grace_period(ctx.config.min_grace_period_secs);
        let plan = plan_pruning(owned, &active_name, grace, ctx.clock.now());
        let mut deleted = Vec::with_capacity(plan.delete.len());
        for revision in &plan.delete {
            match ctx.client.delete_revision(revision).await {
                Ok(()) => {
                    observability::metrics::increment_revisions_pruned();
                    info!(revision = %revision, "Deleted inactive revision");
                    deleted.push(revision.as_str());
                }
                Err(e) => {
                    warn!(revision = %revision, error = %e, "Failed to delete inactive revision");
                    record(&mut failure, e.into());
                }
            }
        }
        owned.retain(|r| !deleted.contains(&r.name_any().as_str()));
        if let Some(after) = plan.requeue_after {
            debug!(requeue_secs = after.as_secs(), "Scheduling requeue for next pruning deadline");
            observability::metrics::increment_requeues_total("prune-deadline");
        }
        requeue = earliest(requeue, plan.requeue_after);
    }

    let active = owned
        .as_deref()
        .and_then(|owned| owned.iter().find(|r| r.name_any() == active_name));
    let status = next_status(
        mesh.status.as_ref(),
        &MeshObservation {
            generation: mesh.metadata.generation,
            active_revision_name: &active_name,
            active,
            owned: owned.as_deref(),
            error: failure.as_ref().map(ToString::to_string),
        },
        ctx.clock.now(),
    );

    let written = write_status(&mesh, status, ctx).await;
    match (failure, written) {
        (Some(e), Err(write_err)) => {
            warn!(error = %write_err, "Failed to write status");
            Err(e)
        }
        (Some(e), Ok(_)) => Err(e),
        (None, Err(write_err)) => Err(write_err),
        (None, Ok(StatusWrite::Conflict)) => {
            let conflict = ctx.conflict_requeue(KIND, name);
            Ok(action_from(earliest(requeue, Some(conflict))))
        }
        (None, Ok(_)) => Ok(action_from(requeue)),
    }
}

/// Keep the first error of the pass.
fn record(failure: &mut Option<Error>, error: Error) {
    if failure.is_none() {
        *failure = Some(error);
    }
}

/// Validate the spec and make sure the active revision exists with the desired spec.
/// Returns a requeue delay when a transient API error deferred the work.
async fn apply_active_revision(
    mesh: &Mesh,
    active_name: &str,
    ctx: &Context,
) -> Result<Option<Duration>> {
    validate(&mesh.spec, ctx)?;
    let values = revision_values(&mesh.spec, active_name, ctx)?;
    let desired = MeshRevisionSpec {
        version: mesh.spec.version.clone(),
        namespace: mesh.spec.namespace.clone(),
        values: Some(values),
    };

    match ctx.client.get_revision(active_name).await? {
        Some(existing) => update_revision(mesh, existing, desired, ctx).await,
        None => create_revision(mesh, active_name, desired, ctx).await,
    }
}

fn validate(spec: &MeshSpec, ctx: &Context) -> Result<()> {
    if spec.version.trim().is_empty() {
        return Err(Error::Validation("spec.version not set".to_string()));
    }
    if spec.namespace.trim().is_empty() {
        return Err(Error::Validation("spec.namespace not set".to_string()));
    }
    if !ctx.config.version_directory(&spec.version).is_dir() {
        return Err(Error::Validation(format!(
            "unsupported version {:?}",
            spec.version
        )));
    }
    Ok(())
}

/// Resolve the full values document for the active revision.
///
/// # Errors
///
/// Fails when a profile cannot be read or parsed, or the values cannot take the forced settings.
pub fn revision_values(spec: &MeshSpec, revision_name: &str, ctx: &Context) -> Result<Values> {
    let profiles_dir = ctx.config.version_directory(&spec.version).join("profiles");
    let mut profiles = vec![ctx.config.default_profile.as_str()];
    if let Some(profile) = spec.profile.as_deref().filter(|p| !p.is_empty()) {
        profiles.push(profile);
    }

    let mut values = resolve_values(&profiles_dir, &profiles, spec.values.as_ref())?;
    values.set(VALUES_NAMESPACE_PATH, spec.namespace.clone())?;
    let revision = values_revision_name(revision_name);
    if !revision.is_empty() {
        values.set(VALUES_REVISION_PATH, revision)?;
    }
    Ok(values)
}

async fn update_revision(
    mesh: &Mesh,
    existing: MeshRevision,
    desired: MeshRevisionSpec,
    ctx: &Context,
) -> Result<Option<Duration>> {
    let name = existing.name_any();
    let owner_uid = mesh.uid().unwrap_or_default();
    let foreign_owner = existing
        .owner_references()
        .iter()
        .find(|o| o.controller == Some(true) && o.uid != owner_uid);
    if let Some(owner) = foreign_owner {
        return Err(Error::Validation(format!(
            "MeshRevision {name} is controlled by {} {}",
            owner.kind, owner.name
        )));
    }

    // An active revision nobody controls (created by hand, or orphaned) is adopted.
    let adoption = if existing.owner_references().iter().any(|o| o.controller == Some(true)) {
        None
    } else {
        mesh.controller_owner_ref(&())
    };
    if existing.spec == desired && adoption.is_none() {
        debug!(revision = %name, "Active revision up to date");
        return Ok(None);
    }

    let adopted = adoption.is_some();
    let mut updated = existing;
    updated.spec = desired;
    if let Some(owner) = adoption {
        updated.owner_references_mut().push(owner);
    }
    match ctx.client.replace_revision(&updated).await {
        Ok(_) if adopted => {
            info!(revision = %name, "Adopted active revision");
            Ok(None)
        }
        Ok(_) => {
            info!(revision = %name, "Updated active revision");
            Ok(None)
        }
        Err(ClientError::Conflict(_)) => Ok(Some(ctx.conflict_requeue(revision::KIND, &name))),
        Err(e) => Err(e.into()),
    }
}

async fn create_revision(
    mesh: &Mesh,
    name: &str,
    desired: MeshRevisionSpec,
    ctx: &Context,
) -> Result<Option<Duration>> {
    let mut revision = MeshRevision::new(name, desired);
    revision.metadata.owner_references = mesh.controller_owner_ref(&()).map(|r| vec![r]);

    match ctx.client.create_revision(&revision).await {
        Ok(_) => {
            info!(revision = %name, "Created active revision");
            Ok(None)
        }
        Err(ClientError::Unavailable(message)) => {
            info!(
                revision = %name,
                %message,
                requeue_secs = ctx.config.not_ready_requeue_secs,
                "API server not ready to create revision, requeueing"
            );
            observability::metrics::increment_requeues_total("not-ready");
            Ok(Some(ctx.config.not_ready_requeue()))
        }
        Err(ClientError::Conflict(_)) => Ok(Some(ctx.conflict_requeue(revision::KIND, name))),
        Err(e) => Err(e.into()),
    }
}

async fn write_status(
    mesh: &Mesh,
    status: MeshStatus,
    ctx: &Context,
) -> Result<StatusWrite> {
    if mesh.status.as_ref() == Some(&status) {
        debug!("Status unchanged, skipping write");
        return Ok(StatusWrite::Unchanged);
    }
    let mut updated = mesh.clone();
    updated.status = Some(status);
    status_write_result(
        ctx.client.replace_mesh_status(&updated).await,
        KIND,
        &mesh.name_any(),
    )
}
