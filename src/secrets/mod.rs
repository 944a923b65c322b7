//! Named secret lookup with a per-name TTL cache.
//!
//! The store never reports its own expiry, so [`SecretCache`] stamps each
//! entry with `fetched_at + ttl`.

use async_trait::async_trait;

mod cache;
mod key_vault;

pub use cache::SecretCache;
pub use key_vault::{KeyVaultClient, KEY_VAULT_SCOPE};

/// Secret as returned by the store. `value` may be missing or empty.
#[derive(Clone, Debug, Default)]
pub struct SecretBundle {
    pub value: Option<String>,
}

/// Upstream secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> anyhow::Result<SecretBundle>;
}
