// HTTP API (health + customer search)
pub mod api;

// File + environment configuration
pub mod config;

// Azure AD access tokens
pub mod credentials;

// Customer search feature
pub mod customers;

// SQL gateway and composition root
pub mod database;

// Error taxonomy
pub mod error;

// Key Vault secrets
pub mod secrets;

pub use config::AppConfig;
pub use error::DataError;
