pub mod env;
pub use env::{apply_env, EnvLookup};

use serde::Deserialize;

/// Default AAD scope for Azure SQL access tokens.
pub const DEFAULT_SQL_SCOPE: &str = "https://database.windows.net/.default";

/// Upper bound for cache durations (one year, in milliseconds).
pub const MAX_CACHE_DURATION_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Complete application configuration.
///
/// Built once in `main` and handed down; nothing below the composition root
/// reads the process environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allow-list. Empty = mirror any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

/// SQL connection coordinates, either direct or by Key Vault secret name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    pub server: Option<String>,
    pub database: Option<String>,
    pub server_secret_name: Option<String>,
    pub database_secret_name: Option<String>,
    pub sql_auth_user: Option<String>,
    pub sql_auth_password: Option<String>,
}

/// Azure AD and Key Vault settings
#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    pub key_vault_uri: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    #[serde(default = "default_managed_identity_endpoint")]
    pub managed_identity_endpoint: String,
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_managed_identity_endpoint() -> String {
    "http://169.254.169.254/metadata/identity/oauth2/token".to_string()
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            key_vault_uri: None,
            tenant_id: None,
            client_id: None,
            client_secret: None,
            authority_host: default_authority_host(),
            managed_identity_endpoint: default_managed_identity_endpoint(),
        }
    }
}

/// Token and secret cache tuning
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_sql_scope")]
    pub sql_scope: String,
    /// Refresh a token this long before it really expires (milliseconds)
    #[serde(default = "default_token_refresh_buffer_ms")]
    pub token_refresh_buffer_ms: i64,
    /// Lifetime of a cached secret, counted from fetch time (milliseconds)
    #[serde(default = "default_secret_ttl_ms")]
    pub secret_ttl_ms: i64,
}

fn default_sql_scope() -> String {
    DEFAULT_SQL_SCOPE.to_string()
}

fn default_token_refresh_buffer_ms() -> i64 {
    2 * 60 * 1000
}

fn default_secret_ttl_ms() -> i64 {
    10 * 60 * 1000
}

impl CacheConfig {
    /// Refresh buffer, clamped to `0..=MAX_CACHE_DURATION_MS`.
    pub fn token_refresh_buffer(&self) -> chrono::Duration {
        clamped_millis(self.token_refresh_buffer_ms)
    }

    /// Secret TTL, clamped to `0..=MAX_CACHE_DURATION_MS`.
    pub fn secret_ttl(&self) -> chrono::Duration {
        clamped_millis(self.secret_ttl_ms)
    }
}

fn clamped_millis(ms: i64) -> chrono::Duration {
    chrono::Duration::milliseconds(ms.clamp(0, MAX_CACHE_DURATION_MS))
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sql_scope: default_sql_scope(),
            token_refresh_buffer_ms: default_token_refresh_buffer_ms(),
            secret_ttl_ms: default_secret_ttl_ms(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    use anyhow::Context;

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: AppConfig = toml::from_str(&contents).context("Failed to parse config file")?;
    Ok(config)
}

impl AppConfig {
    /// Optional TOML file named by `HISTDB_CONFIG`, overlaid by environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("HISTDB_CONFIG") {
            Ok(path) if !path.trim().is_empty() => load_config(&path)?,
            _ => AppConfig::default(),
        };
        apply_env(&mut config, &|key: &str| std::env::var(key).ok());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert!(config.server.allowed_origins.is_empty());
        assert!(config.database.server.is_none());
        assert_eq!(config.cache.sql_scope, "https://database.windows.net/.default");
        assert_eq!(config.cache.token_refresh_buffer_ms, 120_000);
        assert_eq!(config.cache.secret_ttl_ms, 600_000);
        assert_eq!(config.azure.authority_host, "https://login.microsoftonline.com");
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            port = 8080
            allowed_origins = ["https://app.example.com"]

            [database]
            server_secret_name = "SqlServerHost"
            database_secret_name = "SqlDatabaseName"

            [azure]
            key_vault_uri = "https://kv-hist.vault.azure.net"

            [cache]
            token_refresh_buffer_ms = 60000
            secret_ttl_ms = 300000
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.allowed_origins, vec!["https://app.example.com"]);
        assert_eq!(config.database.server_secret_name.as_deref(), Some("SqlServerHost"));
        assert_eq!(
            config.azure.key_vault_uri.as_deref(),
            Some("https://kv-hist.vault.azure.net")
        );
        assert_eq!(config.cache.token_refresh_buffer_ms, 60_000);
        assert_eq!(config.cache.secret_ttl_ms, 300_000);
        // Untouched keys keep defaults
        assert_eq!(config.cache.sql_scope, DEFAULT_SQL_SCOPE);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [database]
            server = "sql.example.net"
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.database.server.as_deref(), Some("sql.example.net"));
        assert_eq!(config.server.port, 3000); // Default
        assert_eq!(config.cache.secret_ttl_ms, 600_000); // Default
    }

    #[test]
    fn test_cache_durations_are_clamped() {
        let config: AppConfig = toml::from_str(
            r#"
            [cache]
            token_refresh_buffer_ms = -5
            secret_ttl_ms = 9223372036854775807
        "#,
        )
        .unwrap();

        assert_eq!(config.cache.token_refresh_buffer(), chrono::Duration::zero());
        assert_eq!(
            config.cache.secret_ttl(),
            chrono::Duration::milliseconds(MAX_CACHE_DURATION_MS)
        );
        assert_eq!(
            CacheConfig::default().token_refresh_buffer(),
            chrono::Duration::minutes(2)
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 4100").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 4100);
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/historical-db.toml").is_err());
    }
}
