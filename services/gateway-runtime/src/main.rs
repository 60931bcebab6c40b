//! Gateway runtime entry point
//!
//! Initializes tracing, loads configuration, builds the `Runtime` (the
//! credential and allocation cores plus their collaborators), starts the
//! health checker, and waits for a shutdown signal. No HTTP listener, admin
//! router, or proxy handler lives here — request handling belongs to the
//! out-of-scope collaborators.

mod config;
mod runtime;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::runtime::Runtime;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting gateway-runtime");

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        region = %config.identity.region,
        strategy = ?config.allocation.token_allocation_strategy,
        self_use_mode = config.allocation.self_use_mode,
        "configuration loaded"
    );

    let encryption_key = load_encryption_key()?;
    let runtime = Runtime::build(&config, encryption_key)
        .await
        .context("failed to build runtime")?;

    runtime.health_checker.start().await;
    info!("health checker started");

    shutdown_signal().await;

    runtime.health_checker.stop().await;
    info!("shutdown complete");
    Ok(())
}

/// Load the at-rest encryption key for the identity store from the
/// `GATEWAY_ENCRYPTION_KEY` environment variable (64 hex chars, 32 bytes).
fn load_encryption_key() -> Result<store::EncryptionKey> {
    let hex = std::env::var("GATEWAY_ENCRYPTION_KEY")
        .context("GATEWAY_ENCRYPTION_KEY must be set to a 64-character hex string")?;
    if hex.len() != 64 {
        anyhow::bail!("GATEWAY_ENCRYPTION_KEY must be exactly 64 hex characters (32 bytes)");
    }
    let mut bytes = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk).context("invalid hex in GATEWAY_ENCRYPTION_KEY")?;
        bytes[i] = u8::from_str_radix(s, 16).context("invalid hex in GATEWAY_ENCRYPTION_KEY")?;
    }
    Ok(store::EncryptionKey::new(bytes))
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
