//! OAuth provider configurations.
//!
//! Each linkable platform needs a token endpoint and client credentials.
//! Endpoints come from [`crate::config::VaultConfig`]; client credentials come
//! from `LINKVAULT_OAUTH_<PLATFORM>_CLIENT_ID` / `_CLIENT_SECRET`.

use std::collections::HashMap;

use crate::config::ProviderSettings;

/// Token endpoint and client credentials for one platform
#[derive(Clone)]
pub struct OAuthProviderConfig {
    pub platform: String,

    /// OAuth token endpoint URL (code exchange and refresh)
    pub token_url: String,

    pub client_id: String,

    pub client_secret: String,
}

impl std::fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("platform", &self.platform)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Environment variable prefix for a platform's client credentials.
///
/// `video-platform` → `LINKVAULT_OAUTH_VIDEO_PLATFORM`
pub fn env_prefix(platform: &str) -> String {
    let normalized: String = platform
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("LINKVAULT_OAUTH_{}", normalized)
}

/// Platforms whose client credentials are available.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, OAuthProviderConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from provider settings and an environment lookup.
    ///
    /// Returns the registry and the platforms skipped for missing credentials.
    pub fn from_settings<F>(
        settings: &HashMap<String, ProviderSettings>,
        env: F,
    ) -> (Self, Vec<String>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::new();
        let mut missing = Vec::new();

        for (platform, provider) in settings {
            let prefix = env_prefix(platform);
            let client_id = env(&format!("{}_CLIENT_ID", prefix)).filter(|v| !v.is_empty());
            let client_secret =
                env(&format!("{}_CLIENT_SECRET", prefix)).filter(|v| !v.is_empty());

            match (client_id, client_secret) {
                (Some(client_id), Some(client_secret)) => registry.insert(OAuthProviderConfig {
                    platform: platform.clone(),
                    token_url: provider.token_url.clone(),
                    client_id,
                    client_secret,
                }),
                _ => missing.push(platform.clone()),
            }
        }

        missing.sort();
        (registry, missing)
    }

    pub fn insert(&mut self, config: OAuthProviderConfig) {
        self.providers.insert(config.platform.clone(), config);
    }

    pub fn get(&self, platform: &str) -> Option<&OAuthProviderConfig> {
        self.providers.get(platform)
    }

    /// Configured platform names, sorted
    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}
