pub mod startup;
pub use startup::StartupCheck;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

use crate::oauth::LifecycleSettings;

/// Token endpoint used for the built-in `youtube` platform
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Complete vault configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Extra or overriding OAuth providers, keyed by platform name
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    /// Refuse weak defaults and incomplete provider credentials
    #[serde(default)]
    pub production: bool,
}

/// HTTP surface configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public base URL the OAuth redirect URI is built from
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    /// When false every request acts as user "default"
    #[serde(default = "default_auth_enabled")]
    pub auth_enabled: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_auth_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            callback_base_url: default_callback_base_url(),
            auth_enabled: default_auth_enabled(),
        }
    }
}

/// Credential database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "credentials.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Token lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Refresh access tokens this long before they expire
    #[serde(default = "default_safety_window")]
    pub safety_window_seconds: i64,
    /// Upper bound for each provider or store call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_safety_window() -> i64 {
    300
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            safety_window_seconds: default_safety_window(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl LifecycleConfig {
    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            safety_window: chrono::Duration::seconds(self.safety_window_seconds),
            request_timeout: std::time::Duration::from_secs(self.request_timeout_seconds),
        }
    }
}

/// Non-secret provider settings. Client credentials come from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSettings {
    pub token_url: String,
}

impl VaultConfig {
    /// Built-in providers merged with the configured ones (configured entries win).
    pub fn provider_settings(&self) -> HashMap<String, ProviderSettings> {
        let mut merged = HashMap::new();
        merged.insert(
            "youtube".to_string(),
            ProviderSettings {
                token_url: GOOGLE_TOKEN_URL.to_string(),
            },
        );
        for (platform, settings) in &self.providers {
            merged.insert(platform.clone(), settings.clone());
        }
        merged
    }

    /// Loads `LINKVAULT_CONFIG` (if set) and applies environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("LINKVAULT_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies `LINKVAULT_*` overrides, ignoring values that fail to parse.
    pub fn apply_env_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("LINKVAULT_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = env("LINKVAULT_CALLBACK_BASE_URL") {
            self.server.callback_base_url = v;
        }
        if let Some(v) = env("LINKVAULT_AUTH_ENABLED") {
            if let Ok(b) = v.parse::<bool>() {
                self.server.auth_enabled = b;
            }
        }
        if let Some(v) = env("LINKVAULT_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = env("LINKVAULT_SAFETY_WINDOW_SECONDS") {
            if let Ok(n) = v.parse::<i64>() {
                self.lifecycle.safety_window_seconds = n;
            }
        }
        if let Some(v) = env("LINKVAULT_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.lifecycle.request_timeout_seconds = n;
            }
        }
        if let Some(v) = env("LINKVAULT_PRODUCTION") {
            if let Ok(b) = v.parse::<bool>() {
                self.production = b;
            }
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<VaultConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: VaultConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
