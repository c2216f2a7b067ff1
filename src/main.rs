//! # Mesh Operator
//!
//! Installs service-mesh control planes from `Mesh` resources, one `MeshRevision`
//! per control plane version, and prunes revisions no workload uses any more.
//!
//! The same binary doubles as the Helm post-renderer that stamps owner metadata
//! onto rendered manifests (`mesh-operator post-render --owner <json>`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use mesh_operator::chart::post_render;
use mesh_operator::config::ControllerConfig;
use mesh_operator::runtime::{initialization, watch_loop};

#[derive(Debug, Parser)]
#[command(name = "mesh-operator", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the operator (default)
    Run,
    /// Helm post-renderer: stamp owner metadata onto manifests read from stdin
    PostRender {
        /// JSON-encoded owner of the rendered release
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run().await,
        Command::PostRender { owner } => post_render::run(&owner),
    }
}

async fn run() -> Result<()> {
    let init = initialization::initialize(ControllerConfig::from_env()).await?;
    watch_loop::run_watch_loop(
        init.client,
        init.workload_cache,
        init.context,
        init.server_state,
    )
    .await
}
