//! Zenoh bridge for SocketCAN.
//!
//! Opens a SocketCAN device, bridges frames to and from Zenoh, and publishes
//! a periodic diagnostic summary of the link health.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use zenoh_bridge_socketcan::bridge::{CanToZenoh, ZenohToCan};
use zenoh_bridge_socketcan::config::CanBridgeConfig;
use zenoh_bridge_socketcan::diagnostics::ZenohDiagnostics;
use zenoh_bridge_socketcan::driver::ThreadedCanInterface;
use zenoh_bridge_socketcan::supervisor::Supervisor;

use canbridge_common::serialization::Format;

/// Zenoh bridge for SocketCAN (CAN bus) interfaces.
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-socketcan")]
#[command(about = "Bridges a SocketCAN device to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "socketcan.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = CanBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let mut log_config = config.logging.clone();
    if let Some(ref level) = args.log_level {
        log_config.level = level.clone();
    }
    canbridge_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting zenoh-bridge-socketcan");
    info!("Loaded configuration from {:?}", args.config);

    // Connect to Zenoh
    let session = Arc::new(
        canbridge_common::connect(&config.zenoh)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?,
    );

    // Open the CAN device. Failure here is fatal: nothing else is
    // constructed and the process exits with a non-zero status.
    let driver = match ThreadedCanInterface::open(
        &config.can.device,
        config.can.loopback,
        &config.can.settings,
    ) {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            error!(device = %config.can.device, error = %e, "Failed to initialize CAN device");
            return Err(e.into());
        }
    };
    info!("Successfully connected to {}", config.can.device);

    // Serialization format for published frames (default to JSON)
    let format = Format::Json;

    // Start the bridge both ways
    let outbound = ZenohToCan::start(session.clone(), &config.can.key_prefix, driver.clone())
        .await
        .context("Failed to start the Zenoh-to-CAN bridge")?;
    let inbound = CanToZenoh::start(session.clone(), &config.can.key_prefix, &driver, format);

    info!(
        "SocketCAN bridge running on '{}', publishing to prefix: {}",
        config.can.device, config.can.key_prefix
    );

    // Publish bridge status
    let status_key = format!("{}/@/status", config.can.key_prefix);
    let status = serde_json::json!({
        "bridge": "socketcan",
        "version": env!("CARGO_PKG_VERSION"),
        "device": config.can.device,
        "status": "running"
    });

    if let Err(e) = session.put(&status_key, status.to_string()).await {
        error!("Failed to publish bridge status: {}", e);
    }

    // Run the health-check cycle until Ctrl+C
    let sink = ZenohDiagnostics::new(session.clone(), &config.can.key_prefix);
    let period = Duration::from_secs(config.can.diagnostics_period_secs);

    let supervisor = Supervisor::new(outbound, inbound)
        .run(period, sink, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await;

    info!("Received shutdown signal");

    // Stop both bridges and wait for their workers, then shut the hardware
    // interface down
    supervisor.shutdown(|| driver.shutdown()).await;

    // Publish offline status
    let status = serde_json::json!({
        "bridge": "socketcan",
        "status": "offline"
    });
    let _ = session.put(&status_key, status.to_string()).await;

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("SocketCAN bridge stopped");

    Ok(())
}
