//! Expiry-aware cache for a single bearer token.

use super::{AccessTokenProvider, TokenCredential};
use crate::config::DEFAULT_SQL_SCOPE;
use crate::error::DataError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Cached token entry. Replaced on refresh, never mutated.
#[derive(Clone, Debug)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Caches one token for one scope and refreshes it `refresh_buffer` before
/// the provider-asserted expiry.
///
/// Callers never receive a token that is inside the buffer window.
pub struct TokenCache {
    credential: Arc<dyn TokenCredential>,
    scope: String,
    refresh_buffer: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    /// Cache for the Azure SQL scope with a 2 minute refresh buffer.
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            credential,
            scope: DEFAULT_SQL_SCOPE.to_string(),
            refresh_buffer: Duration::minutes(2),
            cached: Mutex::new(None),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_refresh_buffer(mut self, refresh_buffer: Duration) -> Self {
        self.refresh_buffer = refresh_buffer;
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the cached token, or fetches a new one when absent or within
    /// the refresh buffer of expiry.
    pub async fn get_access_token(&self) -> Result<String, DataError> {
        if let Some(value) = self.fresh_value(Utc::now()) {
            return Ok(value);
        }

        debug!(scope = %self.scope, "Refreshing access token");

        let token = self
            .credential
            .get_token(&self.scope)
            .await
            .map_err(|e| DataError::Credential(format!("{:#}", e)))?;

        let (value, expires_at) = match token {
            Some(t) if !t.token.is_empty() => match t.expires_at {
                Some(expires_at) => (t.token, expires_at),
                None => {
                    return Err(DataError::TokenAcquisition(format!(
                        "no expiry reported for scope {}",
                        self.scope
                    )))
                }
            },
            _ => {
                return Err(DataError::TokenAcquisition(format!(
                    "no token returned for scope {}",
                    self.scope
                )))
            }
        };

        debug!(scope = %self.scope, expires_at = %expires_at, "Access token acquired");

        *self.lock() = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });

        Ok(value)
    }

    /// Drops the cached token.
    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    fn fresh_value(&self, now: DateTime<Utc>) -> Option<String> {
        let cached = self.lock();
        cached
            .as_ref()
            .filter(|token| {
                token
                    .expires_at
                    .checked_sub_signed(self.refresh_buffer)
                    .is_some_and(|usable_until| usable_until > now)
            })
            .map(|token| token.value.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CachedToken>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AccessTokenProvider for TokenCache {
    async fn access_token(&self) -> Result<String, DataError> {
        self.get_access_token().await
    }

    fn invalidate(&self) {
        TokenCache::invalidate(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::AccessToken;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Credential source that hands out scripted responses and counts calls.
    struct FakeCredential {
        responses: Mutex<VecDeque<anyhow::Result<Option<AccessToken>>>>,
        calls: AtomicUsize,
        scopes: Mutex<Vec<String>>,
    }

    impl FakeCredential {
        fn new(responses: Vec<anyhow::Result<Option<AccessToken>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                scopes: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenCredential for FakeCredential {
        async fn get_token(&self, scope: &str) -> anyhow::Result<Option<AccessToken>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.scopes.lock().unwrap().push(scope.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(None))
        }
    }

    fn token(value: &str, expires_in: Duration) -> anyhow::Result<Option<AccessToken>> {
        Ok(Some(AccessToken {
            token: value.to_string(),
            expires_at: Some(Utc::now() + expires_in),
        }))
    }

    #[tokio::test]
    async fn test_reuses_token_outside_refresh_buffer() {
        let credential = FakeCredential::new(vec![
            token("token-1", Duration::hours(1)),
            token("token-2", Duration::hours(1)),
        ]);
        let cache = TokenCache::new(credential.clone());

        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");
        assert_eq!(credential.calls(), 1);
    }

    #[tokio::test]
    async fn test_refreshes_token_inside_refresh_buffer() {
        // Expires in 1 minute, buffer is 2 minutes → always stale
        let credential = FakeCredential::new(vec![
            token("token-1", Duration::minutes(1)),
            token("token-2", Duration::hours(1)),
        ]);
        let cache = TokenCache::new(credential.clone());

        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_access_token().await.unwrap(), "token-2");
        assert_eq!(credential.calls(), 2);

        // token-2 is fresh, no further calls
        assert_eq!(cache.get_access_token().await.unwrap(), "token-2");
        assert_eq!(credential.calls(), 2);
    }

    #[tokio::test]
    async fn test_custom_refresh_buffer() {
        let credential = FakeCredential::new(vec![
            token("token-1", Duration::minutes(1)),
            token("token-2", Duration::minutes(1)),
        ]);
        let cache = TokenCache::new(credential.clone()).with_refresh_buffer(Duration::seconds(10));

        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");
        assert_eq!(credential.calls(), 1);
    }

    #[tokio::test]
    async fn test_oversized_refresh_buffer_always_refreshes() {
        let credential = FakeCredential::new(vec![
            token("token-1", Duration::hours(1)),
            token("token-2", Duration::hours(1)),
        ]);
        let cache = TokenCache::new(credential.clone()).with_refresh_buffer(Duration::MAX);

        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_access_token().await.unwrap(), "token-2");
        assert_eq!(credential.calls(), 2);
    }

    #[tokio::test]
    async fn test_requests_configured_scope() {
        let credential = FakeCredential::new(vec![token("t", Duration::hours(1))]);
        let cache = TokenCache::new(credential.clone());
        cache.get_access_token().await.unwrap();
        assert_eq!(
            credential.scopes.lock().unwrap().as_slice(),
            ["https://database.windows.net/.default"]
        );

        let credential = FakeCredential::new(vec![token("t", Duration::hours(1))]);
        let cache = TokenCache::new(credential.clone()).with_scope("https://vault.azure.net/.default");
        cache.get_access_token().await.unwrap();
        assert_eq!(
            credential.scopes.lock().unwrap().as_slice(),
            ["https://vault.azure.net/.default"]
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_acquisition_error() {
        let credential = FakeCredential::new(vec![Ok(None)]);
        let cache = TokenCache::new(credential);

        let err = cache.get_access_token().await.unwrap_err();
        assert!(matches!(err, DataError::TokenAcquisition(_)));
    }

    #[tokio::test]
    async fn test_empty_token_is_acquisition_error() {
        let credential = FakeCredential::new(vec![token("", Duration::hours(1))]);
        let cache = TokenCache::new(credential);

        let err = cache.get_access_token().await.unwrap_err();
        assert!(matches!(err, DataError::TokenAcquisition(_)));
    }

    #[tokio::test]
    async fn test_missing_expiry_is_acquisition_error() {
        let credential = FakeCredential::new(vec![Ok(Some(AccessToken {
            token: "no-expiry".to_string(),
            expires_at: None,
        }))]);
        let cache = TokenCache::new(credential);

        let err = cache.get_access_token().await.unwrap_err();
        assert!(matches!(err, DataError::TokenAcquisition(_)));
    }

    #[tokio::test]
    async fn test_credential_failure_propagates() {
        let credential = FakeCredential::new(vec![Err(anyhow::anyhow!("IMDS unreachable"))]);
        let cache = TokenCache::new(credential);

        let err = cache.get_access_token().await.unwrap_err();
        assert_eq!(
            err,
            DataError::Credential("IMDS unreachable".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_nothing_cached() {
        let credential = FakeCredential::new(vec![Ok(None), token("token-1", Duration::hours(1))]);
        let cache = TokenCache::new(credential.clone());

        assert!(cache.get_access_token().await.is_err());
        assert_eq!(cache.get_access_token().await.unwrap(), "token-1");
        assert_eq!(credential.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let credential = FakeCredential::new(vec![
            token("token-1", Duration::hours(1)),
            token("token-2", Duration::hours(1)),
        ]);
        let cache = TokenCache::new(credential.clone());

        assert_eq!(cache.access_token().await.unwrap(), "token-1");
        AccessTokenProvider::invalidate(&cache);
        assert_eq!(cache.access_token().await.unwrap(), "token-2");
        assert_eq!(credential.calls(), 2);
    }
}
