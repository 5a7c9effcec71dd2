//! Encrypted credential records for linked third-party accounts.
//!
//! This module holds the data model shared by the store and the token
//! lifecycle manager:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenEnvelope (plaintext)          │
//! │  - access_token, refresh_token           │
//! │  - absolute expires_at                   │
//! └─────────────────────────────────────────┘
//!          ↓ JSON                ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialRecord                   │
//! │  - one per (user_id, platform)           │
//! │  - opaque ciphertext_blob                │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (SQLite)           │
//! │  - atomic upsert on the composite key    │
//! │  - every read scoped by user_id          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - The envelope is never persisted unencrypted
//! - `Debug` output of an envelope never includes token values
//! - Records belonging to another user are indistinguishable from missing ones

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

pub mod storage;

pub use storage::{CredentialStore, SqliteCredentialStore};

/// Tokens for one linked account, encrypted as a unit.
///
/// Serialized as `{"access_token", "refresh_token", "expires_at"}` with
/// `expires_at` in epoch milliseconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEnvelope {
    /// Short-lived bearer credential for the downstream API
    pub access_token: String,

    /// Long-lived credential used to mint new access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Absolute instant after which `access_token` is invalid (server clock at write).
    /// `None` for tokens stored without an expiry.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Where a stored access token sits relative to its expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// Comfortably before `expires_at - safety_window`
    Valid,
    /// Inside the safety window, not yet expired
    NearExpiry,
    Expired,
}

impl TokenState {
    pub fn needs_refresh(self) -> bool {
        !matches!(self, TokenState::Valid)
    }
}

impl TokenEnvelope {
    /// Builds an envelope from a freshly issued token.
    ///
    /// The provider's relative lifetime is converted to an absolute instant here
    /// and never stored as a duration.
    ///
    /// Fails with [`VaultError::InvalidEnvelope`] for a non-positive lifetime or
    /// one the calendar cannot represent.
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        expires_in_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, VaultError> {
        let expires_at = Some(expires_in_seconds)
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                VaultError::InvalidEnvelope(format!(
                    "token lifetime out of range: {}s",
                    expires_in_seconds
                ))
            })?;

        Ok(Self {
            access_token,
            refresh_token,
            expires_at: Some(expires_at),
        })
    }

    /// Builds an envelope for a token with no expiry and no refresh token.
    pub fn static_token(access_token: String) -> Self {
        Self {
            access_token,
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Returns the envelope after a refresh.
    ///
    /// The existing refresh token is kept when the provider did not send a new one.
    pub fn refreshed(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        expires_in_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, VaultError> {
        Self::issued(
            access_token,
            refresh_token.or_else(|| self.refresh_token.clone()),
            expires_in_seconds,
            now,
        )
    }

    /// Classifies the access token against `now`.
    ///
    /// A token is due for refresh once `now >= expires_at - safety_window`.
    pub fn state(&self, now: DateTime<Utc>, safety_window: Duration) -> TokenState {
        match self.expires_at {
            None => TokenState::Valid,
            Some(expires_at) if now >= expires_at => TokenState::Expired,
            Some(expires_at) if now >= expires_at - safety_window => TokenState::NearExpiry,
            Some(_) => TokenState::Valid,
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, VaultError> {
        serde_json::to_vec(self).map_err(|e| VaultError::InvalidEnvelope(e.to_string()))
    }

    /// Decodes decrypted plaintext, rejecting anything without a usable access token.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        let envelope: TokenEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::InvalidEnvelope(e.to_string()))?;

        if envelope.access_token.is_empty() {
            return Err(VaultError::InvalidEnvelope(
                "access_token is empty".to_string(),
            ));
        }

        Ok(envelope)
    }
}

impl std::fmt::Debug for TokenEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEnvelope")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One stored credential, identified by `(user_id, platform)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Store-assigned id, stable across upserts
    pub id: String,
    pub user_id: String,
    pub platform: String,
    /// Envelope codec output; opaque outside [`crate::crypto::envelope`]
    pub ciphertext_blob: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn summary(&self) -> IntegrationSummary {
        IntegrationSummary {
            id: self.id.clone(),
            platform: self.platform.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Record metadata without the ciphertext, for listing a user's integrations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntegrationSummary {
    pub id: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
