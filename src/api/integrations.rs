//! Integration management endpoints.
//!
//! - `GET /api/integrations`: the caller's linked platforms
//! - `POST /api/integrations`: save a non-OAuth token
//! - `DELETE /api/integrations?id=…` or body `{"platform": …}`: unlink
//! - `GET /api/integrations/:platform/status`: connection status

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{require_user, ApiState, AppError};
use crate::credentials::IntegrationSummary;
use crate::vault::ConnectionStatus;

pub fn create_integrations_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/api/integrations",
            get(list_integrations)
                .post(save_integration)
                .delete(delete_integration),
        )
        .route("/api/integrations/:platform/status", get(integration_status))
        .with_state(Arc::new(state))
}

#[derive(Serialize)]
pub struct IntegrationsResponse {
    integrations: Vec<IntegrationSummary>,
}

#[derive(Deserialize)]
pub struct SaveIntegrationRequest {
    platform: Option<String>,
    token: Option<String>,
}

#[derive(Serialize)]
pub struct SaveIntegrationResponse {
    success: bool,
    integration: IntegrationSummary,
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    id: Option<String>,
}

#[derive(Deserialize)]
struct DeleteBody {
    platform: Option<String>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    success: bool,
    removed: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    platform: String,
    #[serde(flatten)]
    status: ConnectionStatus,
}

/// GET /api/integrations
async fn list_integrations(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<IntegrationsResponse>, AppError> {
    let user_id = require_user(&state, &headers)?;
    let integrations = state.vault.list_linked_platforms(&user_id).await?;
    Ok(Json(IntegrationsResponse { integrations }))
}

/// POST /api/integrations
async fn save_integration(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<SaveIntegrationRequest>,
) -> Result<Json<SaveIntegrationResponse>, AppError> {
    let user_id = require_user(&state, &headers)?;

    let (platform, token) = match (request.platform, request.token) {
        (Some(p), Some(t)) if !p.is_empty() && !t.is_empty() => (p, t),
        _ => {
            return Err(AppError::BadRequest(
                "Platform and token are required".to_string(),
            ))
        }
    };

    let integration = state.vault.store_token(&user_id, &platform, &token).await?;
    Ok(Json(SaveIntegrationResponse {
        success: true,
        integration,
    }))
}

/// DELETE /api/integrations
///
/// By id when `?id=` is given (ownership enforced), otherwise by the
/// `platform` field of the JSON body.
async fn delete_integration(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<DeleteQuery>,
    body: Bytes,
) -> Result<Json<DeleteResponse>, AppError> {
    let user_id = require_user(&state, &headers)?;

    if let Some(id) = query.id.filter(|id| !id.is_empty()) {
        debug!(user_id = %user_id, id = %id, "Deleting integration by id");
        state.vault.unlink_by_id(&user_id, &id).await?;
        return Ok(Json(DeleteResponse {
            success: true,
            removed: 1,
        }));
    }

    let platform = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<DeleteBody>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?
            .platform
    };

    let platform = platform
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("Integration ID or platform is required".to_string()))?;

    let removed = state.vault.unlink(&user_id, &platform).await?;
    Ok(Json(DeleteResponse {
        success: true,
        removed,
    }))
}

/// GET /api/integrations/:platform/status
async fn integration_status(
    State(state): State<Arc<ApiState>>,
    Path(platform): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    let user_id = require_user(&state, &headers)?;
    let status = state.vault.connection_status(&user_id, &platform).await?;
    Ok(Json(StatusResponse { platform, status }))
}
