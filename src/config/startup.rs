//! Startup check: resolve secrets from the environment and refuse unsafe
//! defaults in production.

use tracing::{error, warn};

use super::VaultConfig;
use crate::crypto::ServerSecret;
use crate::error::VaultError;
use crate::oauth::ProviderRegistry;

/// Environment variable holding the server-wide key derivation secret
pub const SERVER_SECRET_ENV: &str = "LINKVAULT_ENCRYPTION_SECRET";

/// Secrets and providers resolved at startup
#[derive(Debug)]
pub struct StartupCheck {
    pub server_secret: ServerSecret,
    pub providers: ProviderRegistry,
    /// Problems tolerated outside production mode
    pub warnings: Vec<String>,
}

impl VaultConfig {
    /// Runs the startup check against the process environment.
    pub fn check(&self) -> Result<StartupCheck, VaultError> {
        self.check_with(|key| std::env::var(key).ok())
    }

    /// Runs the startup check against `env`.
    ///
    /// Outside production a missing server secret falls back to the well-known
    /// default and platforms without client credentials are disabled; both are
    /// logged at `warn`. In production either condition is
    /// [`VaultError::ConfigurationMissing`].
    pub fn check_with<F>(&self, env: F) -> Result<StartupCheck, VaultError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        let server_secret = ServerSecret::from_optional(env(SERVER_SECRET_ENV));
        if server_secret.is_fallback() {
            if self.production {
                error!("{} is not set; refusing to start in production", SERVER_SECRET_ENV);
                return Err(VaultError::ConfigurationMissing(SERVER_SECRET_ENV.to_string()));
            }
            let message = format!(
                "{} is not set: using the PUBLIC fallback secret. Every stored credential can be \
                 decrypted by anyone with database access. Set it before storing real tokens; \
                 changing it later makes existing records unreadable without migration.",
                SERVER_SECRET_ENV
            );
            warn!("{}", message);
            warnings.push(message);
        }

        let (providers, missing) = ProviderRegistry::from_settings(&self.provider_settings(), &env);
        if !missing.is_empty() {
            if self.production {
                error!(platforms = ?missing, "OAuth client credentials missing");
                return Err(VaultError::ConfigurationMissing(format!(
                    "client credentials for {}",
                    missing.join(", ")
                )));
            }
            for platform in &missing {
                let message = format!(
                    "OAuth client credentials for '{}' not set ({}_CLIENT_ID / _CLIENT_SECRET); platform disabled",
                    platform,
                    crate::oauth::provider::env_prefix(platform)
                );
                warn!("{}", message);
                warnings.push(message);
            }
        }

        Ok(StartupCheck {
            server_secret,
            providers,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_complete_environment_passes() {
        let config = VaultConfig::default();
        let check = config
            .check_with(env_from(&[
                (SERVER_SECRET_ENV, "s3cret"),
                ("LINKVAULT_OAUTH_YOUTUBE_CLIENT_ID", "id"),
                ("LINKVAULT_OAUTH_YOUTUBE_CLIENT_SECRET", "secret"),
            ]))
            .unwrap();

        assert!(!check.server_secret.is_fallback());
        assert!(check.providers.get("youtube").is_some());
        assert!(check.warnings.is_empty());
    }

    #[test]
    fn test_fallback_secret_warns_in_development() {
        let config = VaultConfig::default();
        let check = config.check_with(env_from(&[])).unwrap();

        assert!(check.server_secret.is_fallback());
        assert!(check.providers.get("youtube").is_none());
        assert_eq!(check.warnings.len(), 2);
        assert!(check.warnings[0].contains(SERVER_SECRET_ENV));
    }

    #[test]
    fn test_production_refuses_fallback_secret() {
        let config = VaultConfig {
            production: true,
            ..VaultConfig::default()
        };
        let result = config.check_with(env_from(&[
            ("LINKVAULT_OAUTH_YOUTUBE_CLIENT_ID", "id"),
            ("LINKVAULT_OAUTH_YOUTUBE_CLIENT_SECRET", "secret"),
        ]));
        assert!(matches!(result, Err(VaultError::ConfigurationMissing(_))));
    }

    #[test]
    fn test_production_refuses_missing_client_credentials() {
        let config = VaultConfig {
            production: true,
            ..VaultConfig::default()
        };
        let result = config.check_with(env_from(&[(SERVER_SECRET_ENV, "s3cret")]));
        match result {
            Err(VaultError::ConfigurationMissing(what)) => assert!(what.contains("youtube")),
            other => panic!("expected ConfigurationMissing, got {:?}", other.map(|c| c.warnings)),
        }
    }
}
