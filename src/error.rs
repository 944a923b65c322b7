//! Failure taxonomy for the credential / connection layer.

/// Errors surfaced by the token cache, secret cache, connection gateway and
/// database provider.
///
/// `Clone` so that a single in-flight connect outcome can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    /// Connection coordinates cannot be determined.
    #[error("SQL connection configuration is incomplete: {0}")]
    Configuration(String),

    /// Credential source returned no usable token (or no expiry).
    #[error("Failed to acquire access token: {0}")]
    TokenAcquisition(String),

    /// Named secret absent or empty.
    #[error("Secret {0} returned no value")]
    SecretNotFound(String),

    /// Credential source call itself failed.
    #[error("Credential request failed: {0}")]
    Credential(String),

    /// Secret store call itself failed.
    #[error("Secret store request failed: {0}")]
    SecretStore(String),

    #[error("Failed to connect to SQL server: {0}")]
    Connect(String),

    /// Statement execution failed. Displays the driver's text verbatim.
    #[error("{0}")]
    Query(String),

    #[error("Failed to decode row: {0}")]
    Decode(String),
}

impl DataError {
    /// True when the failure text names an expired token.
    ///
    /// Matches on message content only ("token" and "expire", any case), which
    /// depends on the driver's wording and locale.
    pub fn is_token_expiry(&self) -> bool {
        let message = self.to_string().to_lowercase();
        message.contains("token") && message.contains("expire")
    }
}
