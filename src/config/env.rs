use super::{AppConfig, MAX_CACHE_DURATION_MS};

/// Environment lookup. `main` passes `std::env::var`; tests pass a map.
pub type EnvLookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Overlay environment variables onto `config`. Empty values count as unset.
pub fn apply_env(config: &mut AppConfig, lookup: &EnvLookup<'_>) {
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = var("PORT") {
        config.server.port = v.trim().parse().unwrap_or(3000);
    }
    if let Some(v) = var("APP_ALLOWED_ORIGINS") {
        config.server.allowed_origins = parse_allowed_origins(&v);
    }

    let db = &mut config.database;
    set_if_present(&mut db.server, var("SQL_SERVER_HOST"));
    set_if_present(&mut db.database, var("SQL_DATABASE_NAME"));
    set_if_present(&mut db.server_secret_name, var("KEY_VAULT_SQL_SERVER_SECRET"));
    set_if_present(&mut db.database_secret_name, var("KEY_VAULT_SQL_DATABASE_SECRET"));
    set_if_present(&mut db.sql_auth_user, var("SQL_AUTH_USER"));
    set_if_present(&mut db.sql_auth_password, var("SQL_AUTH_PASSWORD"));

    let azure = &mut config.azure;
    set_if_present(&mut azure.key_vault_uri, var("KEY_VAULT_URI"));
    set_if_present(&mut azure.tenant_id, var("AZURE_TENANT_ID"));
    set_if_present(&mut azure.client_id, var("AZURE_CLIENT_ID"));
    set_if_present(&mut azure.client_secret, var("AZURE_CLIENT_SECRET"));
    if let Some(v) = var("AZURE_AUTHORITY_HOST") {
        azure.authority_host = v;
    }
    if let Some(v) = var("AZURE_MANAGED_IDENTITY_ENDPOINT") {
        azure.managed_identity_endpoint = v;
    }

    if let Some(n) = var("SQL_TOKEN_REFRESH_BUFFER_MS").and_then(|v| parse_duration_ms(&v)) {
        config.cache.token_refresh_buffer_ms = n;
    }
    if let Some(n) = var("KEY_VAULT_CACHE_TTL_MS").and_then(|v| parse_duration_ms(&v)) {
        config.cache.secret_ttl_ms = n;
    }
}

/// Milliseconds in `0..=MAX_CACHE_DURATION_MS`; anything else is ignored.
fn parse_duration_ms(raw: &str) -> Option<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|ms| (0..=MAX_CACHE_DURATION_MS).contains(ms))
}

fn set_if_present(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Split a comma separated origin list, dropping blanks.
pub fn parse_allowed_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
