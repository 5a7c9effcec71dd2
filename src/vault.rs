//! The vault's exposed surface.
//!
//! Route handlers and background jobs talk to [`Vault`]; everything below it
//! (key derivation, the envelope codec, the store, the token endpoint) stays
//! an implementation detail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialStore, IntegrationSummary, TokenEnvelope};
use crate::crypto::{self, DerivedKey, ServerSecret};
use crate::error::{Result, VaultError};
use crate::oauth::{LifecycleSettings, ProviderRegistry, TokenEndpoint, TokenLifecycleManager};

/// Key material records may have been written under before the stable key.
#[derive(Clone)]
pub enum LegacyKey {
    /// Key bound to a login session that may still be active
    SessionBound { session_secret: String },
    /// Stable key under a previous server secret
    ServerSecret(ServerSecret),
}

impl std::fmt::Debug for LegacyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacyKey::SessionBound { .. } => f
                .debug_struct("SessionBound")
                .field("session_secret", &"[REDACTED]")
                .finish(),
            LegacyKey::ServerSecret(_) => f.write_str("ServerSecret([REDACTED])"),
        }
    }
}

/// What a UI shows for one integration
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected { expires_at: Option<DateTime<Utc>> },
    NotLinked,
    ReconnectRequired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Already readable with the current key; not rewritten
    AlreadyCurrent,
    Migrated,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub already_current: usize,
    /// Platforms readable by neither key
    pub unreadable: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Encrypted credential vault for linked third-party accounts.
#[derive(Clone)]
pub struct Vault {
    lifecycle: Arc<TokenLifecycleManager>,
}

impl Vault {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        providers: ProviderRegistry,
        server_secret: ServerSecret,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            lifecycle: Arc::new(TokenLifecycleManager::new(
                store,
                endpoint,
                providers,
                server_secret,
                settings,
            )),
        }
    }

    pub fn lifecycle(&self) -> &TokenLifecycleManager {
        &self.lifecycle
    }

    /// Completes an OAuth authorization by exchanging `authorization_code`.
    pub async fn link_account(
        &self,
        user_id: &str,
        platform: &str,
        authorization_code: &str,
        redirect_uri: &str,
    ) -> Result<IntegrationSummary> {
        self.lifecycle
            .exchange_code(user_id, platform, authorization_code, redirect_uri)
            .await
            .map(|record| record.summary())
    }

    pub async fn get_valid_access_token(&self, user_id: &str, platform: &str) -> Result<String> {
        self.lifecycle.get_valid_access_token(user_id, platform).await
    }

    /// Removes the user's integration for `platform`, returning how many records were deleted.
    pub async fn unlink(&self, user_id: &str, platform: &str) -> Result<usize> {
        require_non_empty("user id", user_id)?;
        let removed = self
            .lifecycle
            .store_call(self.lifecycle.store().delete_by_platform(user_id, platform))
            .await?;
        info!(user_id = %user_id, platform = %platform, removed, "Integration unlinked");
        Ok(removed)
    }

    /// Removes one integration by record id.
    ///
    /// Ids owned by other users are reported as [`VaultError::IntegrationNotFound`].
    pub async fn unlink_by_id(&self, user_id: &str, id: &str) -> Result<()> {
        require_non_empty("user id", user_id)?;
        let deleted = self
            .lifecycle
            .store_call(self.lifecycle.store().delete_by_id(id, user_id))
            .await?;
        if !deleted {
            return Err(VaultError::IntegrationNotFound);
        }
        info!(user_id = %user_id, id = %id, "Integration unlinked");
        Ok(())
    }

    pub async fn list_linked_platforms(&self, user_id: &str) -> Result<Vec<IntegrationSummary>> {
        require_non_empty("user id", user_id)?;
        self.lifecycle
            .store_call(self.lifecycle.store().list_for_user(user_id))
            .await
    }

    /// Stores a non-OAuth token (API key, personal access token) that never expires.
    pub async fn store_token(
        &self,
        user_id: &str,
        platform: &str,
        token: &str,
    ) -> Result<IntegrationSummary> {
        require_non_empty("token", token)?;
        let record = self
            .lifecycle
            .seal_and_store(user_id, platform, &TokenEnvelope::static_token(token.to_string()))
            .await?;
        info!(user_id = %user_id, platform = %platform, "Integration token saved");
        Ok(record.summary())
    }

    /// Connection state of one integration, refreshing if needed.
    ///
    /// Only transient failures are returned as errors.
    pub async fn connection_status(&self, user_id: &str, platform: &str) -> Result<ConnectionStatus> {
        match self.lifecycle.fresh_token(user_id, platform).await {
            Ok(token) => Ok(ConnectionStatus::Connected {
                expires_at: token.expires_at,
            }),
            Err(VaultError::NotLinked { .. }) => Ok(ConnectionStatus::NotLinked),
            Err(e) if e.requires_reauthorization() => Ok(ConnectionStatus::ReconnectRequired),
            Err(e) => Err(e),
        }
    }

    /// Refreshes every stored token inside its safety window.
    ///
    /// Per-record failures are logged and counted, never returned.
    pub async fn refresh_expiring(&self, limit: Option<usize>) -> Result<SweepReport> {
        let pairs = self
            .lifecycle
            .store_call(self.lifecycle.store().list_all())
            .await?;

        let mut report = SweepReport::default();
        for (user_id, platform) in pairs.into_iter().take(limit.unwrap_or(usize::MAX)) {
            report.checked += 1;
            match self.lifecycle.fresh_token(&user_id, &platform).await {
                Ok(token) if token.refreshed => report.refreshed += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(user_id = %user_id, platform = %platform, error = %e, "Sweep refresh failed");
                }
            }
        }

        info!(
            checked = report.checked,
            refreshed = report.refreshed,
            failed = report.failed,
            "Refresh sweep complete"
        );
        Ok(report)
    }

    /// Re-encrypts one record from `legacy` key material to the current stable key.
    pub async fn migrate_legacy_record(
        &self,
        user_id: &str,
        platform: &str,
        legacy: &LegacyKey,
    ) -> Result<MigrationOutcome> {
        require_non_empty("user id", user_id)?;
        let record = self
            .lifecycle
            .store_call(self.lifecycle.store().get(user_id, platform))
            .await?
            .ok_or_else(|| VaultError::NotLinked {
                platform: platform.to_string(),
            })?;

        let current = self.lifecycle.stable_key(user_id).await?;
        let envelope = match crypto::decrypt(&record.ciphertext_blob, &current) {
            Ok(plaintext) => match TokenEnvelope::from_json_bytes(&plaintext) {
                Ok(_) => return Ok(MigrationOutcome::AlreadyCurrent),
                // Current key, but written as a bare token string
                Err(_) => decode_legacy_plaintext(&plaintext)?,
            },
            Err(_) => {
                let legacy_key = self.legacy_key(user_id, legacy).await?;
                let plaintext = crypto::decrypt(&record.ciphertext_blob, &legacy_key)?;
                decode_legacy_plaintext(&plaintext)?
            }
        };

        self.lifecycle
            .seal_and_store(user_id, platform, &envelope)
            .await?;

        info!(user_id = %user_id, platform = %platform, "Record re-encrypted under stable key");
        Ok(MigrationOutcome::Migrated)
    }

    /// Migrates every record of `user_id`. Unreadable records are reported, not fatal.
    pub async fn migrate_user(&self, user_id: &str, legacy: &LegacyKey) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        for summary in self.list_linked_platforms(user_id).await? {
            match self
                .migrate_legacy_record(user_id, &summary.platform, legacy)
                .await
            {
                Ok(MigrationOutcome::Migrated) => report.migrated += 1,
                Ok(MigrationOutcome::AlreadyCurrent) => report.already_current += 1,
                Err(e) if e.requires_reauthorization() => {
                    debug!(user_id = %user_id, platform = %summary.platform, "Record unreadable during migration");
                    report.unreadable.push(summary.platform);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    async fn legacy_key(&self, user_id: &str, legacy: &LegacyKey) -> Result<DerivedKey> {
        let user_id = user_id.to_string();
        let legacy = legacy.clone();
        let current = self.lifecycle.server_secret().clone();
        tokio::task::spawn_blocking(move || match legacy {
            LegacyKey::SessionBound { session_secret } => {
                crypto::derive_key(&user_id, Some(&session_secret), &current)
            }
            LegacyKey::ServerSecret(previous) => crypto::derive_stable_key(&user_id, &previous),
        })
        .await
        .map_err(|e| VaultError::Internal(e.to_string()))
    }
}

/// Legacy records hold either an envelope or the bare token string.
fn decode_legacy_plaintext(plaintext: &[u8]) -> Result<TokenEnvelope> {
    match TokenEnvelope::from_json_bytes(plaintext) {
        Ok(envelope) => Ok(envelope),
        Err(e) => match std::str::from_utf8(plaintext) {
            Ok(token) if !token.is_empty() && !token.trim_start().starts_with('{') => {
                Ok(TokenEnvelope::static_token(token.to_string()))
            }
            _ => Err(e),
        },
    }
}

fn require_non_empty(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(VaultError::InvalidInput(format!("{} is empty", what)));
    }
    Ok(())
}
