//! Composition root for database access.
//!
//! Decides once where connection coordinates come from (direct config or two
//! Key Vault secrets), then builds the gateway lazily on first use.

use super::gateway::{ConnectionGateway, GatewayOptions};
use super::pool::PoolFactory;
use super::{Parameters, Row, SqlExecutor};
use crate::config::DatabaseConfig;
use crate::credentials::AccessTokenProvider;
use crate::error::DataError;
use crate::secrets::SecretCache;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tracing::info;

/// Resolved connection coordinates. Immutable once resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionInfo {
    pub server: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

pub struct DatabaseProvider {
    config: DatabaseConfig,
    tokens: Arc<dyn AccessTokenProvider>,
    factory: Arc<dyn PoolFactory>,
    secrets: Option<Arc<SecretCache>>,
    connection_info: OnceCell<ConnectionInfo>,
    client: Mutex<Option<Arc<ConnectionGateway>>>,
}

impl DatabaseProvider {
    pub fn new(
        config: DatabaseConfig,
        tokens: Arc<dyn AccessTokenProvider>,
        factory: Arc<dyn PoolFactory>,
    ) -> Self {
        Self {
            config,
            tokens,
            factory,
            secrets: None,
            connection_info: OnceCell::new(),
            client: Mutex::new(None),
        }
    }

    /// Secret cache used when coordinates are configured by secret name.
    pub fn with_secrets(mut self, secrets: Arc<SecretCache>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Resolves coordinates at most once. Concurrent first callers wait on
    /// the same resolution; a failed resolution is retried on the next call.
    pub async fn resolve_connection_info(&self) -> Result<ConnectionInfo, DataError> {
        self.connection_info
            .get_or_try_init(|| self.resolve())
            .await
            .cloned()
    }

    /// Returns the gateway, creating it on first use.
    pub async fn client(&self) -> Result<Arc<ConnectionGateway>, DataError> {
        let existing = self.lock().clone();
        if let Some(client) = existing {
            return Ok(client);
        }

        let info = self.resolve_connection_info().await?;

        let mut slot = self.lock();
        let client = slot.get_or_insert_with(|| {
            Arc::new(ConnectionGateway::new(
                GatewayOptions {
                    server: info.server,
                    database: info.database,
                    user: info.user,
                    password: info.password,
                },
                Arc::clone(&self.tokens),
                Arc::clone(&self.factory),
            ))
        });
        Ok(Arc::clone(client))
    }

    /// Disposes the gateway (closing its pool) if one was built.
    pub async fn dispose(&self) -> Result<(), DataError> {
        let client = self.lock().take();
        if let Some(client) = client {
            client.dispose().await?;
        }
        Ok(())
    }

    async fn resolve(&self) -> Result<ConnectionInfo, DataError> {
        let db = &self.config;

        if let (Some(server), Some(database)) = (&db.server, &db.database) {
            info!(server = %server, database = %database, "Using direct SQL connection settings");
            return Ok(ConnectionInfo {
                server: server.clone(),
                database: database.clone(),
                user: db.sql_auth_user.clone(),
                password: db.sql_auth_password.clone(),
            });
        }

        if let (Some(server_secret), Some(database_secret)) =
            (&db.server_secret_name, &db.database_secret_name)
        {
            let secrets = self.secrets.as_ref().ok_or_else(|| {
                DataError::Configuration(
                    "Key Vault URI is required when SQL settings come from secrets".to_string(),
                )
            })?;

            let (server, database) = tokio::try_join!(
                secrets.get_secret_value(server_secret),
                secrets.get_secret_value(database_secret)
            )?;

            info!(
                server_secret = %server_secret,
                database_secret = %database_secret,
                "Resolved SQL connection settings from Key Vault"
            );
            return Ok(ConnectionInfo {
                server,
                database,
                user: db.sql_auth_user.clone(),
                password: db.sql_auth_password.clone(),
            });
        }

        Err(DataError::Configuration(
            "Provide direct values or Key Vault secret names.".to_string(),
        ))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<ConnectionGateway>>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SqlExecutor for DatabaseProvider {
    async fn query_rows(
        &self,
        statement: &str,
        parameters: &Parameters,
    ) -> Result<Vec<Row>, DataError> {
        let client = self.client().await?;
        client.query_rows(statement, parameters).await
    }
}
