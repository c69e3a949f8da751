//! Gateway client runner
//!
//! Run with:
//! ```bash
//! cargo run -p pylon-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use pylon_common::{try_init_tracing, ClientConfig};
use pylon_core::EventKind;
use pylon_gateway::ShardManager;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %e, "Client failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    info!(intents = %config.intents, "Configuration loaded");

    let manager = ShardManager::new(config)?;
    manager.events().on(EventKind::ShardReady, |event| async move {
        info!(shard_id = event.shard_id, "Shard online");
        anyhow::Ok(())
    });

    manager.start().await?;

    let interrupted = tokio::select! {
        result = manager.wait_until_ready() => {
            if result.is_ok() {
                info!(shards = manager.shard_count(), "All shards ready");
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if !interrupted {
        tokio::select! {
            () = manager.join() => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
        }
    }

    manager.shutdown().await;

    match manager.failures().first() {
        Some(failure) => Err(failure.message.clone().into()),
        None => Ok(()),
    }
}
