mod config;
mod geo;
mod models;
mod scrapers;
mod storage;
mod supervisor;
mod worker;

use anyhow::Result;
use config::GlobalConfig;
use std::sync::Arc;
use supervisor::Supervisor;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // A missing config file or auth token is fatal here, before any worker starts
    let config_path = GlobalConfig::path_from_env();
    let config = Arc::new(GlobalConfig::load(&config_path)?);

    let shards = Arc::new(config.shards());
    let shard_names: Vec<String> = shards.iter().map(|shard| shard.name()).collect();

    info!(
        config = %config_path.display(),
        shards = shards.len(),
        "realty-scout starting"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;

    let supervisor = Supervisor::new({
        let config = config.clone();
        let shards = shards.clone();
        move |shard, token| worker::run_shard(config.clone(), shards[shard].clone(), token)
    });

    supervisor.run(&shard_names, shutdown).await?;

    info!("realty-scout stopped");
    Ok(())
}

/// Either termination signal cancels the root token. Workers observe their
/// own child tokens, so they stop even if the supervisor never escalates.
fn spawn_signal_listener(shutdown: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => info!("received SIGTERM, stopping..."),
            _ = interrupt.recv() => info!("received SIGINT, stopping..."),
        }
        shutdown.cancel();
    });

    Ok(())
}
