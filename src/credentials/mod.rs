//! Access-token acquisition for Azure SQL and Key Vault.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       ConnectionGateway / KeyVault      │
//! │  - needs a bearer token per connect     │
//! └─────────────────────────────────────────┘
//!          ↓ access_token()       ↑ String
//! ┌─────────────────────────────────────────┐
//! │       TokenCache                         │
//! │  - one cached token per scope            │
//! │  - refresh `refresh_buffer` before expiry│
//! └─────────────────────────────────────────┘
//!          ↓ get_token(scope)     ↑ AccessToken
//! ┌─────────────────────────────────────────┐
//! │       TokenCredential                    │
//! │  - client secret (AAD token endpoint)    │
//! │  - managed identity (IMDS)               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use historical_db::config::AzureConfig;
//! use historical_db::credentials::{default_credential, TokenCache};
//!
//! # async fn run() -> Result<(), historical_db::DataError> {
//! let credential = default_credential(&AzureConfig::default());
//! let tokens = TokenCache::new(credential);
//!
//! // First call hits the credential source, later calls reuse the cached token
//! let token = tokens.get_access_token().await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

mod azure;
mod token_cache;

pub use azure::{default_credential, ClientSecretCredential, ManagedIdentityCredential};
pub use token_cache::TokenCache;

use crate::error::DataError;

/// Bearer token as returned by a credential source.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub token: String,

    /// Provider-asserted expiry. `None` makes the token unusable for caching.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Upstream credential source.
///
/// `Ok(None)` means the source answered but had no token for the scope.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scope: &str) -> anyhow::Result<Option<AccessToken>>;
}

/// What the connection gateway needs: a usable bearer token on demand.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, DataError>;

    /// Forget any cached token so the next call fetches a new one.
    fn invalidate(&self) {}
}
