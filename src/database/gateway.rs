//! Lazily connected SQL gateway with single-flight connect and one-shot
//! retry on token expiry.
//!
//! Pool lifecycle:
//!
//! ```text
//! Absent ──connect──▶ Connecting ──ok──▶ Connected ──reset/dispose──▶ Absent
//!                         │
//!                         └──err──▶ Absent (error propagated)
//! ```

use super::pool::{Authentication, PoolConfig, PoolFactory, SqlPool};
use super::{decode_rows, Parameters, Row, SqlExecutor, SqlRequest};
use crate::credentials::AccessTokenProvider;
use crate::error::DataError;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};


type PendingPool = Shared<BoxFuture<'static, Result<Arc<dyn SqlPool>, DataError>>>;

enum PoolState {
    Absent,
    /// In-flight connect. Late callers clone and await the same future.
    Connecting { attempt: u64, pending: PendingPool },
    Connected(Arc<dyn SqlPool>),
}

/// Where and as whom the gateway connects.
#[derive(Clone, Debug)]
pub struct GatewayOptions {
    pub server: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl GatewayOptions {
    /// Native SQL login applies only when both user and password are set.
    fn sql_credentials(&self) -> Option<(&str, &str)> {
        match (self.user.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user, password))
            }
            _ => None,
        }
    }
}

/// Owns at most one pool and at most one in-flight connect.
pub struct ConnectionGateway {
    options: Arc<GatewayOptions>,
    tokens: Arc<dyn AccessTokenProvider>,
    factory: Arc<dyn PoolFactory>,
    state: Mutex<PoolState>,
    attempts: AtomicU64,
}

impl ConnectionGateway {
    pub fn new(
        options: GatewayOptions,
        tokens: Arc<dyn AccessTokenProvider>,
        factory: Arc<dyn PoolFactory>,
    ) -> Self {
        Self {
            options: Arc::new(options),
            tokens,
            factory,
            state: Mutex::new(PoolState::Absent),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// True when connecting with a SQL login rather than an access token.
    pub fn uses_sql_auth(&self) -> bool {
        self.options.sql_credentials().is_some()
    }

    /// Runs `statement` with `parameters` bound by name and decodes each row.
    pub async fn query<T: DeserializeOwned>(
        &self,
        statement: &str,
        parameters: &Parameters,
    ) -> Result<Vec<T>, DataError> {
        decode_rows(self.query_rows(statement, parameters).await?)
    }

    /// Closes the pool if one exists. No-op otherwise.
    pub async fn dispose(&self) -> Result<(), DataError> {
        let previous = std::mem::replace(&mut *self.lock(), PoolState::Absent);
        if let PoolState::Connected(pool) = previous {
            info!(server = %self.options.server, "Closing SQL pool");
            pool.close().await?;
        }
        Ok(())
    }

    /// Runs the request, handing back the pool it ran on (if one was reached).
    async fn execute(
        &self,
        request: &SqlRequest,
    ) -> (Option<Arc<dyn SqlPool>>, Result<Vec<Row>, DataError>) {
        match self.pool().await {
            Ok(pool) => {
                let outcome = pool.execute(request).await;
                (Some(pool), outcome)
            }
            Err(err) => (None, Err(err)),
        }
    }

    /// Returns the connected pool, joining or starting the single connect.
    async fn pool(&self) -> Result<Arc<dyn SqlPool>, DataError> {
        let (attempt, pending) = {
            let mut state = self.lock();
            let existing = match &*state {
                PoolState::Connected(pool) if pool.is_connected() => {
                    return Ok(Arc::clone(pool));
                }
                PoolState::Connecting { attempt, pending } => Some((*attempt, pending.clone())),
                _ => None,
            };
            match existing {
                Some(existing) => existing,
                None => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                    let pending = self.connect();
                    *state = PoolState::Connecting {
                        attempt,
                        pending: pending.clone(),
                    };
                    (attempt, pending)
                }
            }
        };

        let outcome = pending.await;

        // First finisher publishes the outcome, unless the state moved on meanwhile
        let mut state = self.lock();
        if matches!(&*state, PoolState::Connecting { attempt: current, .. } if *current == attempt)
        {
            *state = match &outcome {
                Ok(pool) => PoolState::Connected(Arc::clone(pool)),
                Err(_) => PoolState::Absent,
            };
        }
        outcome
    }

    fn connect(&self) -> PendingPool {
        let options = Arc::clone(&self.options);
        let tokens = Arc::clone(&self.tokens);
        let factory = Arc::clone(&self.factory);

        async move {
            let authentication = match options.sql_credentials() {
                Some((user, password)) => Authentication::SqlPassword {
                    user: user.to_string(),
                    password: password.to_string(),
                },
                None => Authentication::AccessToken(tokens.access_token().await?),
            };

            let auth = match authentication {
                Authentication::SqlPassword { .. } => "sql",
                Authentication::AccessToken(_) => "token",
            };
            info!(
                server = %options.server,
                database = %options.database,
                auth,
                "Connecting SQL pool"
            );

            factory
                .connect(PoolConfig {
                    server: options.server.clone(),
                    database: options.database.clone(),
                    encrypt: true,
                    trust_server_certificate: false,
                    authentication,
                })
                .await
        }
        .boxed()
        .shared()
    }

    /// Discards `failed` so the next call reconnects with a new token.
    ///
    /// A pool already rebuilt by a concurrent retry is left alone. With no
    /// failed pool (the connect itself failed) only the token is dropped.
    async fn reset_pool(&self, failed: Option<&Arc<dyn SqlPool>>) {
        let discarded = {
            let mut state = self.lock();
            match (&*state, failed) {
                (PoolState::Connected(current), Some(failed)) if same_pool(current, failed) => {
                    let current = Arc::clone(current);
                    *state = PoolState::Absent;
                    Some(current)
                }
                _ => None,
            }
        };

        if discarded.is_some() || failed.is_none() {
            self.tokens.invalidate();
        }

        if let Some(pool) = discarded {
            if let Err(e) = pool.close().await {
                warn!(error = %e, "Failed to close discarded SQL pool");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SqlExecutor for ConnectionGateway {
    async fn query_rows(
        &self,
        statement: &str,
        parameters: &Parameters,
    ) -> Result<Vec<Row>, DataError> {
        let request = parameters
            .iter()
            .fold(SqlRequest::new(statement), |request, (name, value)| {
                request.input(name.clone(), value.clone())
            });

        match self.execute(&request).await {
            (failed, Err(err)) if !self.uses_sql_auth() && err.is_token_expiry() => {
                warn!(error = %err, "SQL access token expired, rebuilding pool and retrying once");
                self.reset_pool(failed.as_ref()).await;
                self.execute(&request).await.1
            }
            (_, outcome) => {
                if let Ok(rows) = &outcome {
                    debug!(rows = rows.len(), "Query complete");
                }
                outcome
            }
        }
    }
}

fn same_pool(a: &Arc<dyn SqlPool>, b: &Arc<dyn SqlPool>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
