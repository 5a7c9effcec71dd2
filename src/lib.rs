// HTTP surface
pub mod api;

// Identity Provider adapter
pub mod auth;

// TOML/environment configuration and startup check
pub mod config;

// Credential records and storage
pub mod credentials;

// Key derivation and envelope codec
pub mod crypto;

pub mod error;

// OAuth token exchange and lifecycle
pub mod oauth;

pub mod vault;

pub use error::{Result, VaultError};
pub use vault::{ConnectionStatus, LegacyKey, Vault};
