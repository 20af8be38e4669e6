use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use beacon::{Config, ConsulRegistry, RegistrationManager, ResolutionCache};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Client-side service discovery runtime: TTL registration and cached resolution")]
struct Args {
    #[arg(short, long, default_value = "config/beacon.toml")]
    config: String,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("beacon={}", level))
        .init();

    info!("Starting beacon discovery runtime");

    // Load configuration
    let config = Config::from_file(&args.config).await?;

    let registry: Arc<dyn beacon::RegistryClient> =
        Arc::new(ConsulRegistry::new(config.registry.clone())?);

    // Registration failure at startup is fatal: an unregistered instance
    // receives no traffic.
    let registration = Arc::new(RegistrationManager::new(
        Arc::clone(&registry),
        &config.registration,
    ));
    registration.register().await?;
    info!(id = %registration.id(), "Instance registered");

    let cache = Arc::new(ResolutionCache::new(registry, &config.resolver));
    cache.start().await?;

    // Wait for shutdown signal
    signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install CTRL+C signal handler: {}", e))?;
    warn!("Received CTRL+C, shutting down gracefully...");

    // Stop the refresh loop first, then deregister; deregistration failure
    // is logged inside shutdown, never escalated.
    cache.shutdown().await;
    registration.shutdown().await;

    info!("Beacon shutdown complete");
    Ok(())
}
