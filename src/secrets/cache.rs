use super::SecretStore;
use crate::error::DataError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Debug)]
struct CachedSecret {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Per-name secret cache.
///
/// Entries are created lazily on first lookup and live for `ttl` from the
/// moment they were fetched. State is in-memory only.
pub struct SecretCache {
    store: Arc<dyn SecretStore>,
    ttl: Duration,
    entries: DashMap<String, CachedSecret>,
}

impl SecretCache {
    /// Cache with the default 10 minute TTL.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            ttl: Duration::minutes(10),
            entries: DashMap::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the cached value while it is unexpired, otherwise fetches,
    /// validates and re-caches it.
    pub async fn get_secret_value(&self, name: &str) -> Result<String, DataError> {
        if let Some(value) = self.fresh_value(name, Utc::now()) {
            return Ok(value);
        }

        debug!(secret = %name, "Fetching secret");

        let bundle = self
            .store
            .get_secret(name)
            .await
            .map_err(|e| DataError::SecretStore(format!("{:#}", e)))?;

        let value = bundle
            .value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DataError::SecretNotFound(name.to_string()))?;

        self.entries.insert(
            name.to_string(),
            CachedSecret {
                value: value.clone(),
                expires_at: Utc::now()
                    .checked_add_signed(self.ttl)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );

        Ok(value)
    }

    /// Drops one entry.
    pub fn invalidate(&self, name: &str) {
        self.entries.remove(name);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn fresh_value(&self, name: &str, now: DateTime<Utc>) -> Option<String> {
        let entry = self.entries.get(name)?;
        let value = (now < entry.expires_at).then(|| entry.value.clone());
        value
    }
}
