use anyhow::{Context, Result};
use historical_db::api::create_app;
use historical_db::credentials::{default_credential, TokenCache};
use historical_db::customers::{CustomerRepository, CustomerService};
use historical_db::database::{DatabaseProvider, TiberiusPoolFactory};
use historical_db::secrets::{KeyVaultClient, SecretCache};
use historical_db::AppConfig;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "historical_db=info,tower_http=info".into()),
        )
        .init();

    info!("Historical DB API starting...");

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        port = config.server.port,
        allowed_origins = config.server.allowed_origins.len(),
        key_vault = config.azure.key_vault_uri.is_some(),
        "Configuration loaded"
    );

    let credential = default_credential(&config.azure);

    let sql_tokens = Arc::new(
        TokenCache::new(Arc::clone(&credential))
            .with_scope(config.cache.sql_scope.clone())
            .with_refresh_buffer(config.cache.token_refresh_buffer()),
    );

    let mut provider = DatabaseProvider::new(
        config.database.clone(),
        sql_tokens,
        Arc::new(TiberiusPoolFactory),
    );

    if let Some(vault_uri) = &config.azure.key_vault_uri {
        let store = Arc::new(KeyVaultClient::new(vault_uri.clone(), Arc::clone(&credential)));
        let secrets = SecretCache::new(store).with_ttl(config.cache.secret_ttl());
        provider = provider.with_secrets(Arc::new(secrets));
        info!(vault = %vault_uri, "Key Vault secret cache initialized");
    }

    let provider = Arc::new(provider);
    let repository = CustomerRepository::new(provider.clone());
    let service = Arc::new(CustomerService::new(repository));
    let app = create_app(&config.server, service);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind API port")?;
    info!(port = config.server.port, "Historical DB API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("Shutdown signal received");

    // Close the SQL pool if one was opened
    if let Err(e) = provider.dispose().await {
        warn!(error = %e, "Failed to close SQL pool");
    }
    info!("Historical DB API stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl_c signal");
    }
}
