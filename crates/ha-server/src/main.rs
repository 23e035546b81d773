//! Home Assistant Rust Server
//!
//! Serves trusted networks login flows for a Home Assistant config directory.
//!
//! Usage: `homeassistant [CONFIG_DIR]` (falls back to `$HA_CONFIG_DIR`, then `./config`)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ha_api::{create_router, AuthState};
use ha_auth::{AuthConfig, AuthStore, LoginFlowManager, TrustedNetworksAuthProvider};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Default Home Assistant HTTP port
const DEFAULT_PORT: u16 = 8123;

fn config_dir() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HA_CONFIG_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_dir = config_dir();
    info!("Starting Home Assistant (Rust) from {}", config_dir.display());

    let config = AuthConfig::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    if config.providers.len() > 1 {
        warn!(
            "{} trusted_networks providers configured, using the first",
            config.providers.len()
        );
    }
    let provider_config = config
        .providers
        .into_iter()
        .next()
        .context("no trusted_networks auth provider configured")?;

    let store = Arc::new(AuthStore::with_storage(&config_dir));
    store.load().await.context("loading auth storage")?;

    let provider =
        TrustedNetworksAuthProvider::new(provider_config, config.trusted_proxies, store);
    info!(
        "Auth provider '{}' trusts {} networks",
        provider.name(),
        provider.config().trusted_networks.len()
    );

    let flows = Arc::new(LoginFlowManager::new(Arc::new(provider)));
    let app = create_router(AuthState::new(flows));

    let addr = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Home Assistant is running on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down...");
    })
    .await?;

    Ok(())
}
