//! OAuth 2.0 token lifecycle for linked accounts.
//!
//! - `provider`: per-platform token endpoints and client credentials
//! - `exchange`: the authorization-code and refresh-token grants
//! - `lifecycle`: expiry tracking, single-flight refresh and re-persistence

pub mod exchange;
pub mod lifecycle;
pub mod provider;

pub use exchange::{HttpTokenEndpoint, TokenEndpoint, TokenGrant};
pub use lifecycle::{FreshToken, LifecycleSettings, TokenLifecycleManager};
pub use provider::{OAuthProviderConfig, ProviderRegistry};
