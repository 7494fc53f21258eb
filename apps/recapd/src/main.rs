use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use recap_kernel::{AgentMode, KernelBuilder, RecapConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "recapd")]
#[command(about = "Record one session and print the workflow it produced")]
struct Cli {
    #[arg(long, default_value = "recap.toml")]
    config: PathBuf,
    #[arg(long)]
    simulate: bool,
    #[arg(long, default_value_t = 3)]
    record_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = RecapConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if cli.simulate {
        config.agent.mode = AgentMode::Simulated;
    }

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config))
        .compact()
        .init();
    let kernel = KernelBuilder::from_config(config).build()?;

    if !kernel.ping_agent().await {
        warn!("agent did not answer ping; start will likely fail");
    }

    let mut events = kernel.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let rendered = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_owned());
            info!(event = %rendered, "event.appended");
        }
    });

    let session = kernel.start_session().await?;
    info!(session_id = %session.id, "recording");

    tokio::time::sleep(Duration::from_secs(cli.record_secs)).await;
    kernel.stop_session()?;
    kernel.wait_for_pipeline(&session.id).await;

    match kernel.current_session() {
        Some(finished) => {
            if !finished.state.is_terminal() {
                warn!(state = %finished.state, "pipeline ended before a terminal state");
            }
            info!(state = %finished.state, degraded = finished.degraded, "session finished");
            println!("{}", serde_json::to_string_pretty(&finished)?);
        }
        None => warn!("session was cleared before it finished"),
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    event_task.abort();
    if let Err(error) = event_task.await {
        warn!(%error, "event task stopped");
    }

    Ok(())
}

/// `RUST_LOG` wins over `service.log_level`.
fn log_filter(config: &RecapConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.clone()))
}
