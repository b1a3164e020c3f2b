//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! GATEWAY_TOKEN=... cargo run -p gateway-client
//! ```
//!
//! Configuration is loaded from environment variables. Every dispatch is logged until
//! Ctrl-C, then the connection is closed gracefully.

use anyhow::Context;
use gateway_client::{EventFilter, GatewayClient};
use gateway_common::{try_init_tracing, GatewayConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize tracing
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = format!("{e:#}"), "Gateway client failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("loading configuration")?;
    info!(
        intents = config.intents.bits(),
        version = config.gateway_version,
        shard = ?config.shard,
        "Configuration loaded"
    );

    let client = GatewayClient::builder(config)
        .on_failure(|e| error!(error = %e, "Gateway failure"))
        .build()
        .context("building gateway client")?;

    let mut events = client
        .registry()
        .context("client has no dispatch registry")?
        .subscribe(EventFilter::All);
    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(event = %event.name, "Dispatch received");
        }
    });

    client.connect().await.context("connecting to gateway")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down");

    client.disconnect(true).await;
    logger.abort();
    Ok(())
}
