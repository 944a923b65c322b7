//! Azure Key Vault secrets client (REST, api-version 7.4).

use super::{SecretBundle, SecretStore};
use crate::credentials::{TokenCache, TokenCredential};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

/// AAD scope for the Key Vault data plane.
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

const API_VERSION: &str = "7.4";

#[derive(Deserialize, Debug)]
struct SecretResponse {
    #[serde(default)]
    value: Option<String>,
}

/// Key Vault secret store. Holds its own token cache for the vault scope.
pub struct KeyVaultClient {
    vault_url: String,
    tokens: TokenCache,
    http_client: Client,
}

impl KeyVaultClient {
    pub fn new(vault_url: impl Into<String>, credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            vault_url: vault_url.into().trim_end_matches('/').to_string(),
            tokens: TokenCache::new(credential).with_scope(KEY_VAULT_SCOPE),
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl SecretStore for KeyVaultClient {
    async fn get_secret(&self, name: &str) -> Result<SecretBundle> {
        let token = self.tokens.get_access_token().await?;
        let url = format!("{}/secrets/{}", self.vault_url, urlencoding::encode(name));

        let response = self
            .http_client
            .get(&url)
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Failed to send Key Vault request for secret {}", name))?;

        // Absent secret, reported like an empty one
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(secret = %name, "Key Vault has no such secret");
            return Ok(SecretBundle::default());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Key Vault request for secret {} failed with status {}: {}",
                name,
                status,
                body
            ));
        }

        let secret: SecretResponse = response
            .json()
            .await
            .context("Failed to parse Key Vault secret response")?;

        Ok(SecretBundle {
            value: secret.value,
        })
    }
}
