//! Identity Provider adapter.
//!
//! The vault never authenticates anyone itself. An upstream identity layer
//! issues an opaque user id, which reaches us as the bearer token of the
//! request. With auth disabled every request acts as [`DEFAULT_USER_ID`].

use axum::http::HeaderMap;
use thiserror::Error;


/// User id for every request when auth is disabled
pub const DEFAULT_USER_ID: &str = "default";

/// Resolves the requesting user's id.
pub fn authenticate(headers: &HeaderMap, auth_enabled: bool) -> Result<String, IdentityError> {
    if !auth_enabled {
        return Ok(DEFAULT_USER_ID.to_string());
    }
    extract_bearer_token(headers)
}

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, IdentityError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(IdentityError::Missing)?
        .to_str()
        .map_err(|_| IdentityError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, IdentityError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(IdentityError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(IdentityError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(IdentityError::Empty);
    }

    Ok(token.to_string())
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum IdentityError {
    #[error("Authorization token not provided")]
    Missing,
    /// Not "Bearer <token>", or not valid header text
    #[error("Invalid authorization token format")]
    InvalidFormat,
    #[error("Authorization token is empty")]
    Empty,
}
