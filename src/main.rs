// src/main.rs - Operator host for the CRL changer stages
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::broadcast;

use crl_changer::console::Console;
use crl_changer::{load_config, Changer, DeviceProxy, SimulatedStage};

#[derive(Debug, Parser)]
#[command(name = "crl-changer", version, about = "Drive motorized changer stages")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "changer.toml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    tracing::info!("Starting CRL changer");
    tracing::info!("Loading configuration from: {}", args.config.display());

    let config = load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config.display(), e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!("Device server: {}", config.tango_server);
    tracing::info!("Move timeout: {} ms, polling at {} Hz", config.timeout_ms, config.polling_rate_hz);

    // No network client is linked in; every motor is backed by a simulated stage.
    let sim = config.simulation.clone();
    let changer = Arc::new(Changer::new(config, |identity| {
        tracing::info!("Attaching simulated stage for {}", identity.device_address);
        Ok(Box::new(SimulatedStage::new(&identity.device_address, &sim)) as Box<dyn DeviceProxy>)
    })?);
    changer.start().await;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut console = Console::new(Arc::clone(&changer));
    console.spawn_event_log(shutdown_tx.clone());

    tokio::select! {
        result = console.run(BufReader::new(tokio::io::stdin())) => {
            if let Err(e) = result {
                tracing::error!("Console input failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    let _ = shutdown_tx.send(());
    changer.shutdown().await;
    Ok(())
}
