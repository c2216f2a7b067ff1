//! # Watch Loop
//!
//! Runs the `Mesh` and `MeshRevision` controllers side by side and restarts a
//! controller whose stream ends, until a shutdown signal arrives.
//!
//! Namespace and pod changes reach the revision controller through the
//! [`WorkloadCache`] rather than watches of their own.

use crate::cache::WorkloadCache;
use crate::constants::API_GROUP;
use crate::controller::{mesh, revision, Context};
use crate::crd::{Mesh, MeshRevision};
use crate::error::Result;
use crate::observability;
use crate::ownership::owner_of;
use crate::runtime::error_policy::{handle_reconciliation_error, reset_backoff};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::Api;
use kube::{Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerRuntimeConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run both controllers until shutdown.
#[allow(clippy::missing_errors_doc, reason = "startup errors are reported by main")]
pub async fn run_watch_loop(
    client: Client,
    workload_cache: WorkloadCache,
    ctx: Arc<Context>,
    server_state: Arc<ServerState>,
) -> anyhow::Result<()> {
    server_state.set_ready(true);

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown_state.set_ready(false);
    });

    tokio::join!(
        restart_loop(mesh::KIND, &server_state, &ctx, || {
            mesh_controller(client.clone(), Arc::clone(&ctx))
        }),
        restart_loop(revision::KIND, &server_state, &ctx, || {
            revision_controller(client.clone(), &workload_cache, Arc::clone(&ctx))
        }),
    );

    info!("Controllers stopped gracefully");
    Ok(())
}

/// Run a controller, restarting it whenever its stream ends, until shutdown.
async fn restart_loop<F, Fut>(kind: &str, server_state: &ServerState, ctx: &Context, run: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        info!(kind, "Starting controller");
        run().await;

        if !server_state.ready() {
            break;
        }
        let delay = ctx.config.watch_restart_delay();
        warn!(
            kind,
            "Controller stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
        if !server_state.ready() {
            break;
        }
    }
    info!(kind, "Controller stopped");
}

fn controller_config(ctx: &Context) -> ControllerRuntimeConfig {
    ControllerRuntimeConfig::default().concurrency(ctx.config.max_concurrent_reconciliations)
}

async fn mesh_controller(client: Client, ctx: Arc<Context>) {
    let meshes: Api<Mesh> = Api::all(client.clone());
    let revisions: Api<MeshRevision> = Api::all(client);

    Controller::new(meshes, watcher::Config::default())
        .owns(revisions, watcher::Config::default())
        .with_config(controller_config(&ctx))
        .shutdown_on_signal()
        .run(
            |obj, ctx| timed(mesh::KIND, obj.name_any(), Arc::clone(&ctx), mesh::reconcile(obj, ctx)),
            |obj, error, ctx| handle_reconciliation_error(mesh::KIND, &obj.name_any(), error, &ctx),
            ctx,
        )
        .for_each(|result| {
            log_dispatch(mesh::KIND, result.map(|(obj, _)| obj.name));
            futures::future::ready(())
        })
        .await;
}

async fn revision_controller(
    client: Client,
    workload_cache: &WorkloadCache,
    ctx: Arc<Context>,
) {
    let revisions: Api<MeshRevision> = Api::all(client.clone());

    Controller::new(revisions, watcher::Config::default())
        .watches(
            Api::<Deployment>::all(client.clone()),
            watcher::Config::default(),
            owning_revision,
        )
        .watches(
            Api::<DaemonSet>::all(client.clone()),
            watcher::Config::default(),
            owning_revision,
        )
        .watches(
            Api::<ConfigMap>::all(client.clone()),
            watcher::Config::default(),
            owning_revision,
        )
        .watches(
            Api::<Service>::all(client),
            watcher::Config::default(),
            owning_revision,
        )
        .reconcile_all_on(workload_cache.subscribe())
        .with_config(controller_config(&ctx))
        .shutdown_on_signal()
        .run(
            |obj, ctx| {
                timed(
                    revision::KIND,
                    obj.name_any(),
                    Arc::clone(&ctx),
                    revision::reconcile(obj, ctx),
                )
            },
            |obj, error, ctx| {
                handle_reconciliation_error(revision::KIND, &obj.name_any(), error, &ctx)
            },
            ctx,
        )
        .for_each(|result| {
            log_dispatch(revision::KIND, result.map(|(obj, _)| obj.name));
            futures::future::ready(())
        })
        .await;
}

/// Map a managed workload back to the `MeshRevision` that owns it.
#[allow(
    clippy::needless_pass_by_value,
    reason = "mappers passed to Controller::watches take the object by value"
)]
fn owning_revision<K: Resource>(obj: K) -> Option<ObjectRef<MeshRevision>> {
    owner_of(obj.meta(), revision::KIND, API_GROUP).map(|owner| ObjectRef::new(&owner.name))
}

/// Wrap a reconcile with the duration and count metrics, resetting the error
/// backoff on success.
async fn timed(
    kind: &'static str,
    name: String,
    ctx: Arc<Context>,
    reconcile: impl Future<Output = Result<Action>>,
) -> Result<Action> {
    let start = Instant::now();
    observability::metrics::increment_reconciliations(kind);
    let result = reconcile.await;
    observability::metrics::observe_reconciliation_duration(kind, start.elapsed().as_secs_f64());
    if result.is_ok() {
        reset_backoff(kind, &name, &ctx);
    }
    result
}

fn log_dispatch<E: std::fmt::Display>(kind: &str, result: std::result::Result<String, E>) {
    match result {
        Ok(name) => debug!(kind, name = %name, "Reconciled"),
        Err(e) => debug!(kind, error = %e, "Controller event error"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
