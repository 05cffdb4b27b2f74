// lanpulse-agent binary: config, tracing, scheduler, HTTP/WS server.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lanpulse_agent::{
    AgentConfig, AgentError, AgentServer, ProbeScheduler, ServiceState, SubscriberRegistry,
};
use lanpulse_probe::{ProbeRunner, ProcessProbe};

#[derive(Debug, Parser)]
#[command(name = "lanpulse-agent", version, about = "Home-network telemetry agent")]
struct Cli {
    /// Path to the TOML config file (default: ./lanpulse.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the configured listen port.
    #[arg(long)]
    listen_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.listen_port {
        config.listen_port = port;
    }

    let registry = Arc::new(SubscriberRegistry::new());
    let runner: Arc<dyn ProbeRunner> = Arc::new(ProcessProbe::new(config.probe_config()));
    let cancel = CancellationToken::new();

    // Storage is an external collaborator; the standalone agent runs
    // without one.
    let scheduler = ProbeScheduler::new(
        config.scheduler_config(),
        Arc::clone(&registry),
        Arc::clone(&runner),
        None,
        cancel.clone(),
    );
    let scheduler_handles = scheduler.spawn();

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.listen_port));
    let server = AgentServer::bind(addr, ServiceState { registry, runner }).await?;

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    server.serve(cancel.clone()).await?;

    // Stop the probe loops and wait for them to wind down.
    cancel.cancel();
    for handle in scheduler_handles {
        let _ = handle.await;
    }

    Ok(())
}
