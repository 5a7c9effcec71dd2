// HTTP surface over the vault

pub mod integrations;
pub mod oauth;

pub use integrations::create_integrations_router;
pub use oauth::create_oauth_router;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use tracing::error;

use crate::auth;
use crate::error::VaultError;
use crate::vault::Vault;

/// Shown whenever the only recovery is to reconnect; never the underlying cause.
pub const RECONNECT_MESSAGE: &str = "This integration needs to be reconnected";

/// Shared application state for the vault API
#[derive(Clone)]
pub struct ApiState {
    pub vault: Vault,
    pub auth_enabled: bool,
    /// Public base URL the OAuth redirect URI is built from
    pub callback_base_url: String,
}

/// Complete router: integrations and OAuth callback
pub fn create_router(state: ApiState) -> Router {
    create_integrations_router(state.clone()).merge(create_oauth_router(state))
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for vault endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    /// The integration must be reconnected by the user
    Reconnect,
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Reconnect => (StatusCode::CONFLICT, RECONNECT_MESSAGE.to_string()),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::NotLinked { platform } => {
                AppError::NotFound(format!("'{}' is not connected", platform))
            }
            VaultError::IntegrationNotFound => {
                AppError::NotFound("Integration not found".to_string())
            }
            VaultError::UnknownPlatform(platform) => {
                AppError::NotFound(format!("Platform '{}' is not available", platform))
            }
            VaultError::InvalidInput(msg) => AppError::BadRequest(msg),
            e if e.is_transient() => AppError::BadGateway(
                "The provider is temporarily unavailable, try again later".to_string(),
            ),
            e if e.requires_reauthorization() => AppError::Reconnect,
            e => {
                error!(error = %e, "Vault operation failed");
                AppError::ServerError("Internal server error".to_string())
            }
        }
    }
}

/// Resolves the requesting user, or 401.
pub(crate) fn require_user(state: &ApiState, headers: &HeaderMap) -> Result<String, AppError> {
    auth::authenticate(headers, state.auth_enabled)
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CodecError, ProviderError};

    #[test]
    fn test_crypto_failures_render_generic_reconnect() {
        let response = AppError::from(VaultError::DecryptionFailed(
            CodecError::AuthenticationFailure,
        ))
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            AppError::from(VaultError::RefreshFailed(ProviderError::Timeout)),
            AppError::BadGateway(_)
        ));
        assert!(matches!(
            AppError::from(VaultError::RefreshFailed(ProviderError::Rejected {
                status: 400,
                body: "invalid_grant".into()
            })),
            AppError::Reconnect
        ));
        assert!(matches!(
            AppError::from(VaultError::IntegrationNotFound),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(VaultError::ConfigurationMissing("x".into())),
            AppError::ServerError(_)
        ));
    }
}
