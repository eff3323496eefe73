use anyhow::Result;
use telemon_agent::{Agent, AgentConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;
    tracing::info!(
        server = %config.server_endpoint,
        wire_format = ?config.wire_format,
        workers = config.rate_limit,
        poll_secs = config.poll_interval_secs,
        report_secs = config.report_interval_secs,
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        "telemon-agent starting"
    );

    let agent = Agent::from_config(&config)?;
    let cancel = CancellationToken::new();
    let run = tokio::spawn(agent.run(cancel.clone()));

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    cancel.cancel();
    run.await?;

    Ok(())
}
