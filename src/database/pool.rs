use super::{Row, SqlRequest};
use crate::error::DataError;
use async_trait::async_trait;
use std::sync::Arc;

/// How a pool authenticates. Chosen once per pool build.
#[derive(Clone, PartialEq)]
pub enum Authentication {
    /// Native SQL login.
    SqlPassword { user: String, password: String },
    /// AAD bearer token.
    AccessToken(String),
}

impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authentication::SqlPassword { user, .. } => f
                .debug_struct("SqlPassword")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
            Authentication::AccessToken(_) => f.write_str("AccessToken([REDACTED])"),
        }
    }
}

/// Everything needed to open one pool.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    pub server: String,
    pub database: String,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub authentication: Authentication,
}

/// A live connection to the relational store.
#[async_trait]
pub trait SqlPool: Send + Sync {
    /// False once the connection is known to be closed or broken.
    fn is_connected(&self) -> bool;

    /// Runs the statement with its named inputs. Empty result → empty vec.
    async fn execute(&self, request: &SqlRequest) -> Result<Vec<Row>, DataError>;

    async fn close(&self) -> Result<(), DataError>;
}

/// Opens pools. Returns only once the connection is established.
#[async_trait]
pub trait PoolFactory: Send + Sync {
    async fn connect(&self, config: PoolConfig) -> Result<Arc<dyn SqlPool>, DataError>;
}
