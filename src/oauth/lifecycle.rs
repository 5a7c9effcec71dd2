//! OAuth token lifecycle: code exchange, expiry tracking, proactive refresh.
//!
//! Per (user, platform) a linked account moves through:
//!
//! ```text
//! Unlinked ──exchange──▶ Valid ──time──▶ NearExpiry ──time──▶ Expired
//!                          ▲                 │                   │
//!                          └──── refresh ◀───┴───────────────────┘
//!                                                 (no refresh token: ReauthorizationRequired)
//! ```
//!
//! Reads are strictly decrypt → check expiry → maybe refresh → persist. The
//! persist step is a single upsert of the whole re-encrypted envelope, so no
//! reader can observe a half-updated record.
//!
//! Concurrent refreshes of the same key are collapsed: the first caller runs
//! the refresh and every caller that arrives while it is in flight receives
//! the same outcome, including a failure. The provider is called at most once
//! per flight and a failed refresh is never retried on a waiter's behalf.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::exchange::{TokenEndpoint, TokenGrant};
use super::provider::{OAuthProviderConfig, ProviderRegistry};
use crate::credentials::{CredentialRecord, CredentialStore, TokenEnvelope, TokenState};
use crate::crypto::{self, DerivedKey, ServerSecret};
use crate::error::{ProviderError, Result, StoreError, VaultError};

/// Timing knobs for the lifecycle manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Refresh once `now >= expires_at - safety_window`
    pub safety_window: Duration,
    /// Upper bound for each provider or store call
    pub request_timeout: std::time::Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            safety_window: Duration::minutes(5),
            request_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// An access token ready for use
#[derive(Clone, PartialEq, Eq)]
pub struct FreshToken {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether a provider refresh produced this token
    pub refreshed: bool,
}

impl std::fmt::Debug for FreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("refreshed", &self.refreshed)
            .finish()
    }
}

type RefreshKey = (String, String);

/// Outcome slot shared by every caller of one refresh
type RefreshFlight = Arc<OnceCell<Result<FreshToken>>>;

/// Orchestrates exchange, refresh and re-persistence of OAuth tokens.
pub struct TokenLifecycleManager {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    providers: ProviderRegistry,
    server_secret: ServerSecret,
    settings: LifecycleSettings,
    refresh_flights: DashMap<RefreshKey, RefreshFlight>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        providers: ProviderRegistry,
        server_secret: ServerSecret,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            endpoint,
            providers,
            server_secret,
            settings,
            refresh_flights: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub(crate) fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub(crate) fn server_secret(&self) -> &ServerSecret {
        &self.server_secret
    }

    /// Exchanges an authorization code and stores the resulting tokens.
    ///
    /// `redirect_uri` must equal the one used in the authorization request;
    /// the manager never derives it.
    pub async fn exchange_code(
        &self,
        user_id: &str,
        platform: &str,
        authorization_code: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord> {
        validate_user_id(user_id)?;
        if authorization_code.is_empty() {
            return Err(VaultError::InvalidInput(
                "authorization code is empty".to_string(),
            ));
        }
        let provider = self.provider(platform)?;

        let grant = self
            .provider_call(
                self.endpoint
                    .exchange_code(provider, authorization_code, redirect_uri),
            )
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, platform = %platform, error = %e, "Token exchange failed");
                VaultError::ExchangeFailed(e)
            })?;

        let envelope = envelope_from_grant(grant, Utc::now())?;
        let record = self.seal_and_store(user_id, platform, &envelope).await?;

        info!(
            user_id = %user_id,
            platform = %platform,
            has_refresh_token = envelope.refresh_token.is_some(),
            "Account linked"
        );

        Ok(record)
    }

    /// Returns a usable access token, refreshing it first if it is inside the
    /// safety window or already expired.
    pub async fn get_valid_access_token(&self, user_id: &str, platform: &str) -> Result<String> {
        self.fresh_token(user_id, platform)
            .await
            .map(|token| token.access_token)
    }

    /// Like [`Self::get_valid_access_token`], also reporting expiry and whether a refresh happened.
    pub async fn fresh_token(&self, user_id: &str, platform: &str) -> Result<FreshToken> {
        validate_user_id(user_id)?;

        let envelope = self.load_envelope(user_id, platform).await?;
        if !envelope.state(Utc::now(), self.settings.safety_window).needs_refresh() {
            return Ok(FreshToken {
                access_token: envelope.access_token,
                expires_at: envelope.expires_at,
                refreshed: false,
            });
        }

        self.refresh_single_flight(user_id, platform).await
    }

    /// Stores `envelope` for (user, platform), replacing any existing record.
    pub async fn seal_and_store(
        &self,
        user_id: &str,
        platform: &str,
        envelope: &TokenEnvelope,
    ) -> Result<CredentialRecord> {
        validate_user_id(user_id)?;
        validate_platform(platform)?;

        let key = self.stable_key(user_id).await?;
        let blob = seal(envelope, &key)?;
        self.store_call(self.store.upsert(user_id, platform, &blob))
            .await
    }

    /// Decrypts the stored envelope for (user, platform).
    pub async fn load_envelope(&self, user_id: &str, platform: &str) -> Result<TokenEnvelope> {
        let record = self
            .store_call(self.store.get(user_id, platform))
            .await?
            .ok_or_else(|| VaultError::NotLinked {
                platform: platform.to_string(),
            })?;

        let key = self.stable_key(user_id).await?;
        open(&record.ciphertext_blob, &key).map_err(|e| {
            warn!(
                user_id = %user_id,
                platform = %platform,
                "Stored credentials unreadable, reauthorization required"
            );
            e
        })
    }

    /// Derives the current stable key for `user_id` off the async executor.
    pub async fn stable_key(&self, user_id: &str) -> Result<DerivedKey> {
        let user_id = user_id.to_string();
        let secret = self.server_secret.clone();
        tokio::task::spawn_blocking(move || crypto::derive_stable_key(&user_id, &secret))
            .await
            .map_err(|e| VaultError::Internal(e.to_string()))
    }

    /// Joins the in-flight refresh for (user, platform), or starts one.
    ///
    /// Every caller that joins a flight gets that flight's outcome, success or
    /// failure. A flight is forgotten once it has an outcome; only callers
    /// arriving after that start a new one.
    async fn refresh_single_flight(&self, user_id: &str, platform: &str) -> Result<FreshToken> {
        let key: RefreshKey = (user_id.to_string(), platform.to_string());
        let flight = self
            .refresh_flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let outcome = flight
            .get_or_init(|| self.refresh_once(user_id, platform))
            .await
            .clone();

        self.refresh_flights
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &flight));

        outcome
    }

    /// One refresh attempt, run by the flight leader.
    async fn refresh_once(&self, user_id: &str, platform: &str) -> Result<FreshToken> {
        // Re-read: a flight that finished since our first read may already have refreshed
        let envelope = self.load_envelope(user_id, platform).await?;
        let state = envelope.state(Utc::now(), self.settings.safety_window);

        if !state.needs_refresh() {
            debug!(user_id = %user_id, platform = %platform, "Token refreshed by concurrent caller");
            return Ok(FreshToken {
                access_token: envelope.access_token,
                expires_at: envelope.expires_at,
                refreshed: false,
            });
        }

        let Some(refresh_token) = envelope.refresh_token.clone() else {
            return match state {
                TokenState::Expired => {
                    info!(user_id = %user_id, platform = %platform, "Token expired without refresh token");
                    Err(VaultError::ReauthorizationRequired {
                        platform: platform.to_string(),
                    })
                }
                // Still usable until it actually expires
                _ => Ok(FreshToken {
                    access_token: envelope.access_token,
                    expires_at: envelope.expires_at,
                    refreshed: false,
                }),
            };
        };

        let provider = self.provider(platform)?;
        debug!(user_id = %user_id, platform = %platform, state = ?state, "Refreshing access token");

        let grant = self
            .provider_call(self.endpoint.refresh(provider, &refresh_token))
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, platform = %platform, error = %e, "Token refresh failed");
                VaultError::RefreshFailed(e)
            })?;

        let refreshed = envelope.refreshed(
            grant.access_token,
            grant.refresh_token,
            grant.expires_in,
            Utc::now(),
        )?;
        self.seal_and_store(user_id, platform, &refreshed).await?;

        info!(user_id = %user_id, platform = %platform, "Access token refreshed");

        Ok(FreshToken {
            access_token: refreshed.access_token,
            expires_at: refreshed.expires_at,
            refreshed: true,
        })
    }

    fn provider(&self, platform: &str) -> Result<&OAuthProviderConfig> {
        self.providers
            .get(platform)
            .ok_or_else(|| VaultError::UnknownPlatform(platform.to_string()))
    }

    async fn provider_call<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, ProviderError>>,
    ) -> std::result::Result<T, ProviderError> {
        tokio::time::timeout(self.settings.request_timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout)?
    }

    pub(crate) async fn store_call<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        tokio::time::timeout(self.settings.request_timeout, call)
            .await
            .map_err(|_| VaultError::Timeout)?
            .map_err(VaultError::from)
    }
}

fn envelope_from_grant(grant: TokenGrant, now: DateTime<Utc>) -> Result<TokenEnvelope> {
    TokenEnvelope::issued(grant.access_token, grant.refresh_token, grant.expires_in, now)
}

/// Serializes and encrypts an envelope.
pub(crate) fn seal(envelope: &TokenEnvelope, key: &DerivedKey) -> Result<String> {
    let plaintext = envelope.to_json_bytes()?;
    crypto::encrypt(&plaintext, key).map_err(|e| VaultError::InvalidEnvelope(e.to_string()))
}

/// Decrypts and strictly decodes an envelope.
pub(crate) fn open(blob: &str, key: &DerivedKey) -> Result<TokenEnvelope> {
    let plaintext = crypto::decrypt(blob, key)?;
    TokenEnvelope::from_json_bytes(&plaintext)
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(VaultError::InvalidInput("user id is empty".to_string()));
    }
    Ok(())
}

fn validate_platform(platform: &str) -> Result<()> {
    if platform.is_empty() {
        return Err(VaultError::InvalidInput("platform is empty".to_string()));
    }
    Ok(())
}
