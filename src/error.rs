//! Error taxonomy for the credential vault.
//!
//! Every failure path returns a distinguishable variant so callers can choose
//! between prompting the user to reconnect an integration and retrying later.

use std::sync::Arc;
use thiserror::Error;

/// Failures of the envelope codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The blob does not have the `salt:nonce:tag:ciphertext` shape, or a
    /// segment is not valid base64 of the expected length.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The authentication tag did not verify (wrong key, corruption or tampering).
    #[error("envelope authentication failed")]
    AuthenticationFailure,

    #[error("plaintext too large to encrypt")]
    PlaintextTooLarge,
}

/// Failures talking to an OAuth authorization server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider answered with a non-success status (e.g. `invalid_grant`).
    #[error("provider rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller-supplied timeout elapsed before the provider answered.
    #[error("provider request timed out")]
    Timeout,

    /// The provider answered 2xx with a body we cannot use.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Network-level failures may succeed on a later attempt; rejections will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transport(_) | ProviderError::Timeout)
    }
}

/// Failures of the relational store collaborator.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(Arc<rusqlite::Error>),

    #[error("credential store lock poisoned")]
    Poisoned,

    #[error("blocking store task failed: {0}")]
    Task(String),

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(Arc::new(err))
    }
}

/// Top-level vault error.
///
/// `Clone` so one refresh outcome can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum VaultError {
    /// No credential record exists for this user and platform.
    #[error("no linked account for platform '{platform}'")]
    NotLinked { platform: String },

    /// The stored ciphertext could not be decrypted.
    #[error("stored credentials could not be decrypted: {0}")]
    DecryptionFailed(#[from] CodecError),

    /// The decrypted plaintext is not a valid token envelope.
    #[error("stored token envelope is invalid: {0}")]
    InvalidEnvelope(String),

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(ProviderError),

    #[error("token refresh failed: {0}")]
    RefreshFailed(ProviderError),

    /// The access token expired and no refresh token is available.
    #[error("reauthorization required for platform '{platform}'")]
    ReauthorizationRequired { platform: String },

    /// No record with this id belongs to the requesting user.
    #[error("integration not found")]
    IntegrationNotFound,

    #[error("unknown or unconfigured platform '{0}'")]
    UnknownPlatform(String),

    #[error("required configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("credential store error: {0}")]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),

    /// A store operation exceeded the request timeout.
    #[error("credential store operation timed out")]
    Timeout,
}

impl VaultError {
    /// True when the only recovery is for the user to reconnect the integration.
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            VaultError::NotLinked { .. }
            | VaultError::DecryptionFailed(_)
            | VaultError::InvalidEnvelope(_)
            | VaultError::ReauthorizationRequired { .. } => true,
            VaultError::ExchangeFailed(e) | VaultError::RefreshFailed(e) => !e.is_transient(),
            _ => false,
        }
    }

    /// True when the caller may retry the same call later with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            VaultError::ExchangeFailed(e) | VaultError::RefreshFailed(e) => e.is_transient(),
            VaultError::Timeout => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
