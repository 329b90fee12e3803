use anyhow::{Context, Result};
use clap::Parser;
use corral_engine::DockerEngine;
use corral_supervisor::Supervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "corral-daemon")]
#[command(author, version, about = "Single-host container supervisor", long_about = None)]
struct DaemonArgs {
    /// Path to the container declaration file.
    #[arg(long, default_value = "/etc/container-manager.yaml")]
    config: PathBuf,

    /// Unix socket of the local container engine.
    #[arg(long, default_value = "/var/run/docker.sock")]
    engine_socket: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "corral_daemon=info,corral_supervisor=info,corral_engine=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(DaemonArgs::parse()).await
}

async fn run(args: DaemonArgs) -> Result<()> {
    info!(
        config = %args.config.display(),
        engine_socket = %args.engine_socket.display(),
        "starting corral"
    );

    let engine = Arc::new(DockerEngine::new(&args.engine_socket));
    let supervisor = Supervisor::new(engine, &args.config);

    supervisor
        .reload_from_source()
        .context("cannot read config")?;
    supervisor
        .remove_stale_containers()
        .await
        .context("cannot remove stale containers")?;
    supervisor.reload_instances();

    supervisor.run().await.context("supervisor failed")?;

    info!("corral stopped");
    Ok(())
}
