//! OAuth redirect target.
//!
//! The authorization request itself is built by the front end. The provider
//! redirects back to `GET /api/oauth/:platform/callback`, where the code is
//! exchanged and the tokens stored for the requesting user.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{require_user, ApiState, AppError};

/// Create OAuth API router
pub fn create_oauth_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/oauth/:platform/callback", get(oauth_callback))
        .with_state(Arc::new(state))
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth success response
#[derive(Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    message: String,
    platform: String,
}

/// Redirect URI registered with the provider for `platform`.
///
/// Must be byte-identical to the one used in the authorization request.
pub fn callback_redirect_uri(callback_base_url: &str, platform: &str) -> String {
    format!(
        "{}/api/oauth/{}/callback",
        callback_base_url.trim_end_matches('/'),
        platform
    )
}

/// GET /api/oauth/:platform/callback
async fn oauth_callback(
    State(state): State<Arc<ApiState>>,
    Path(platform): Path<String>,
    Query(callback): Query<OAuthCallback>,
    headers: HeaderMap,
) -> Result<Json<OAuthSuccessResponse>, AppError> {
    debug!(platform = %platform, "OAuth callback received");

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(
            platform = %platform,
            error = %error,
            description = %description,
            "OAuth authorization failed"
        );
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {}",
            error
        )));
    }

    let code = callback
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;

    let user_id = require_user(&state, &headers)?;
    let redirect_uri = callback_redirect_uri(&state.callback_base_url, &platform);

    state
        .vault
        .link_account(&user_id, &platform, &code, &redirect_uri)
        .await?;

    info!(platform = %platform, user_id = %user_id, "OAuth flow completed successfully");

    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: format!("Successfully connected {}", platform),
        platform,
    }))
}
