//! # Initialization
//!
//! Startup sequence: rustls crypto provider, tracing, metrics, the HTTP server,
//! the Kubernetes client and workload cache, the Helm driver and the shared
//! reconcile [`Context`].

use crate::cache::WorkloadCache;
use crate::chart::{ChartManager, HelmCli};
use crate::client::KubeApiClient;
use crate::clock::SystemClock;
use crate::config::ControllerConfig;
use crate::controller::Context;
use crate::observability;
use crate::server::{start_server, ServerState};
use anyhow::{Context as _, Result};
use kube::Client;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub workload_cache: WorkloadCache,
    pub context: Arc<Context>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("workload_cache", &self.workload_cache)
            .field("context", &self.context)
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Install the ring crypto provider for rustls.
///
/// Must run before any TLS connection is made. A second call is harmless.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}

/// Set up the global tracing subscriber.
///
/// `RUST_LOG` wins over `LOG_LEVEL`; `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(config: &ControllerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mesh_operator={}", config.log_level)));

    if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Initialize the operator runtime.
#[allow(clippy::missing_errors_doc, reason = "startup errors are reported by main")]
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    install_crypto_provider();
    init_tracing(&config);

    info!("🚀 Starting mesh operator");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        resource_directory = %config.resource_directory.display(),
        default_profile = %config.default_profile,
        max_concurrent_reconciliations = config.max_concurrent_reconciliations,
        "Loaded configuration"
    );

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let state_for_server = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, state_for_server).await {
            error!("HTTP server error: {e}");
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let workload_cache = WorkloadCache::start(&client);

    let post_renderer =
        std::env::current_exe().context("Failed to locate the operator executable")?;
    let helm = HelmCli::new(config.helm_binary.as_deref())
        .context("Failed to locate the helm binary")?
        .with_post_renderer(post_renderer);
    info!(helm = ?helm, "✅ Helm driver ready");

    let context = Arc::new(Context::new(
        Arc::new(
            KubeApiClient::new(client.clone()).with_workload_cache(workload_cache.clone()),
        ),
        ChartManager::new(Arc::new(helm)),
        config,
        Arc::new(SystemClock),
    ));

    info!("Operator initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        workload_cache,
        context,
        server_state,
    })
}
