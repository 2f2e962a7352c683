use anyhow::{Context, Result};
use bizhub::api::{create_router, run_state_cleanup, ApiState};
use bizhub::config::BizhubConfig;
use bizhub::credentials::CredentialStore;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bizhub=info".into()),
        )
        .init();

    info!("Bizhub starting...");

    let config = BizhubConfig::load().context("Failed to load configuration")?;

    let encryption_key = std::env::var("BIZHUB_ENCRYPTION_KEY")
        .context("BIZHUB_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;

    info!(
        bind_addr = %config.server.bind_addr,
        public_base_url = %config.server.public_base_url,
        credentials_db = %config.credentials.db_path,
        auth_enabled = config.auth.enabled,
        oauth_clients = config.oauth.clients.len(),
        "Configuration loaded"
    );

    let credential_store = Arc::new(
        CredentialStore::new(&config.credentials.db_path, &encryption_key)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let state = ApiState::from_config(&config, credential_store)?;

    tokio::spawn(run_state_cleanup(
        state.state_manager.clone(),
        config.oauth.cleanup_interval_seconds,
    ));

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Bizhub API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    info!("Bizhub stopped");

    Ok(())
}
