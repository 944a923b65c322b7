//! Azure AD credential sources.
//!
//! Two ways of getting a token, picked once at startup by [`default_credential`]:
//! - client secret: OAuth2 client-credentials grant against the AAD token endpoint
//! - managed identity: the instance metadata service (IMDS)

use super::{AccessToken, TokenCredential};
use crate::config::AzureConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// AAD token endpoint response (client credentials grant)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// IMDS token response. `expires_on` is epoch seconds, sent as a string.
#[derive(Deserialize, Debug)]
struct ManagedIdentityResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_on: Option<String>,
}

/// Service principal credential (tenant + client id + client secret).
pub struct ClientSecretCredential {
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    http_client: Client,
}

impl ClientSecretCredential {
    pub fn new(
        authority_host: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            authority_host: authority_host.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http_client: Client::new(),
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scope: &str) -> Result<Option<AccessToken>> {
        let token_url = self.token_url();

        let mut form_data = HashMap::new();
        form_data.insert("grant_type", "client_credentials");
        form_data.insert("client_id", self.client_id.as_str());
        form_data.insert("client_secret", self.client_secret.as_str());
        form_data.insert("scope", scope);

        tracing::debug!(scope = %scope, "Requesting client credentials token from {}", token_url);

        let response = self
            .http_client
            .post(&token_url)
            .header("Accept", "application/json")
            .form(&form_data)
            .send()
            .await
            .context("Failed to send token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("Token request failed with status {}: {}", status, body));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        Ok(token_response.access_token.map(|token| AccessToken {
            token,
            expires_at: token_response
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
        }))
    }
}

/// Managed identity credential backed by IMDS.
pub struct ManagedIdentityCredential {
    endpoint: String,
    client_id: Option<String>,
    http_client: Client,
}

impl ManagedIdentityCredential {
    /// `client_id` selects a user-assigned identity; `None` uses the system identity.
    pub fn new(endpoint: impl Into<String>, client_id: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id,
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, scope: &str) -> Result<Option<AccessToken>> {
        // IMDS takes a resource, not a v2 scope
        let resource = scope.trim_end_matches("/.default");

        let mut query = vec![("api-version", "2018-02-01"), ("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = self
            .http_client
            .get(&self.endpoint)
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await
            .context("Failed to send managed identity token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Managed identity token request failed with status {}: {}",
                status,
                body
            ));
        }

        let token_response: ManagedIdentityResponse = response
            .json()
            .await
            .context("Failed to parse managed identity token response")?;

        let expires_at = token_response
            .expires_on
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        Ok(token_response
            .access_token
            .map(|token| AccessToken { token, expires_at }))
    }
}

/// Client secret credential when tenant, client id and secret are all
/// configured; managed identity otherwise.
pub fn default_credential(config: &AzureConfig) -> Arc<dyn TokenCredential> {
    match (&config.tenant_id, &config.client_id, &config.client_secret) {
        (Some(tenant_id), Some(client_id), Some(client_secret)) => {
            tracing::info!("Using client secret credential");
            Arc::new(ClientSecretCredential::new(
                config.authority_host.clone(),
                tenant_id.clone(),
                client_id.clone(),
                client_secret.clone(),
            ))
        }
        _ => {
            tracing::info!(
                user_assigned = config.client_id.is_some(),
                "Using managed identity credential"
            );
            Arc::new(ManagedIdentityCredential::new(
                config.managed_identity_endpoint.clone(),
                config.client_id.clone(),
            ))
        }
    }
}
