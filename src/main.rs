use anyhow::{Context, Result};
use linkvault::api::{create_router, ApiState};
use linkvault::config::VaultConfig;
use linkvault::credentials::SqliteCredentialStore;
use linkvault::oauth::HttpTokenEndpoint;
use linkvault::vault::Vault;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Lower bound between background refresh sweeps
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkvault=info".into()),
        )
        .init();

    info!("Linkvault starting...");

    let config = VaultConfig::from_env().context("Failed to load configuration")?;
    let startup = config.check().context("Startup check failed")?;
    let settings = config.lifecycle.settings();

    info!(
        bind_addr = %config.server.bind_addr,
        database_path = %config.storage.database_path,
        platforms = ?startup.providers.platforms(),
        auth_enabled = config.server.auth_enabled,
        production = config.production,
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteCredentialStore::new(&config.storage.database_path)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let endpoint = Arc::new(
        HttpTokenEndpoint::new(settings.request_timeout)
            .context("Failed to build OAuth HTTP client")?,
    );

    let vault = Vault::new(
        store,
        endpoint,
        startup.providers,
        startup.server_secret,
        settings,
    );

    // Proactively refresh tokens entering their safety window
    let sweep_vault = vault.clone();
    let sweep_interval = settings
        .safety_window
        .to_std()
        .map(|window| (window / 2).max(MIN_SWEEP_INTERVAL))
        .unwrap_or(MIN_SWEEP_INTERVAL);
    let sweep_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_vault.refresh_expiring(None).await {
                warn!(error = %e, "Refresh sweep failed");
            }
        }
    });

    let router = create_router(ApiState {
        vault,
        auth_enabled: config.server.auth_enabled,
        callback_base_url: config.server.callback_base_url.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "Vault API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Vault API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    sweep_handle.abort();
    info!("Linkvault stopped");

    Ok(())
}
