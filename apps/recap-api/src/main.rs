use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use recap_kernel::{AgentMode, KernelBuilder, RecapConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod routes;

use crate::routes::build_router;

#[derive(Debug, Parser)]
#[command(name = "recap-api")]
#[command(about = "Recording session control API")]
struct Cli {
    #[arg(long, default_value = "recap.toml")]
    config: PathBuf,
    /// Overrides `service.listen`.
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Use the in-process agent instead of the local socket.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = RecapConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if cli.simulate {
        config.agent.mode = AgentMode::Simulated;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.clone()));
    if config.service.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
    }

    let listen = match cli.listen {
        Some(listen) => listen,
        None => config
            .service
            .listen
            .parse()
            .with_context(|| format!("invalid service.listen {:?}", config.service.listen))?,
    };

    let kernel = KernelBuilder::from_config(config).build()?;
    let app = build_router(kernel);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "recap-api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
