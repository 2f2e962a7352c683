use action_adapters::api::{create_router, ActionsAppState};
use anyhow::{Context, Result};
use bizhub::config::BizhubConfig;
use bizhub::credentials::CredentialStore;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "action_adapters=info,bizhub=info".into()),
        )
        .init();

    info!("Action adapters starting...");

    let config = BizhubConfig::load().context("Failed to load configuration")?;

    let encryption_key = std::env::var("BIZHUB_ENCRYPTION_KEY")
        .context("BIZHUB_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;

    let credential_store = Arc::new(
        CredentialStore::new(&config.credentials.db_path, &encryption_key)
            .context("Failed to initialize credential store")?,
    );

    let state = ActionsAppState::from_config(&config, credential_store)?;
    info!(
        payment_providers = ?state.payments.configured(),
        "Configured payment providers"
    );

    let router = create_router(state);
    let addr = config.server.actions_bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "Action adapters API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    info!("Action adapters stopped");

    Ok(())
}
