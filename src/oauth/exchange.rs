//! OAuth token endpoint calls.
//!
//! Handles exchanging authorization codes for tokens and refreshing access
//! tokens. Both are form-encoded POSTs to the provider's token endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::provider::OAuthProviderConfig;
use crate::error::ProviderError;

/// Tokens issued by a provider, with the lifetime still relative
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when the provider does not rotate refresh tokens
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// The two calls the vault makes against an authorization server.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// `grant_type=authorization_code`
    async fn exchange_code(
        &self,
        provider: &OAuthProviderConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError>;

    /// `grant_type=refresh_token`
    async fn refresh(
        &self,
        provider: &OAuthProviderConfig,
        refresh_token: &str,
    ) -> Result<TokenGrant, ProviderError>;
}

/// Longest access token lifetime accepted from a provider (ten years)
pub const MAX_EXPIRES_IN_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    /// Rejects responses the envelope cannot be built from
    fn into_grant(self) -> Result<TokenGrant, ProviderError> {
        if self.access_token.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "empty access_token".to_string(),
            ));
        }
        let expires_in = self
            .expires_in
            .ok_or_else(|| ProviderError::InvalidResponse("missing expires_in".to_string()))?;
        if !(1..=MAX_EXPIRES_IN_SECONDS).contains(&expires_in) {
            return Err(ProviderError::InvalidResponse(format!(
                "expires_in out of range: {}",
                expires_in
            )));
        }

        Ok(TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_in,
        })
    }
}

/// Token endpoint client over HTTP
#[derive(Clone)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
}

impl HttpTokenEndpoint {
    /// Creates a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    async fn post_form(
        &self,
        token_url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenGrant, ProviderError> {
        let response = self
            .client
            .post(token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;

        // Check response status
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Rejected { status, body });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        token_response.into_grant()
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(e.to_string())
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(
        &self,
        provider: &OAuthProviderConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        tracing::debug!(
            platform = %provider.platform,
            token_url = %provider.token_url,
            "Exchanging authorization code for token"
        );

        let grant = self
            .post_form(
                &provider.token_url,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("client_id", provider.client_id.as_str()),
                    ("client_secret", provider.client_secret.as_str()),
                ],
            )
            .await?;

        tracing::debug!(
            platform = %provider.platform,
            has_refresh_token = grant.refresh_token.is_some(),
            expires_in = grant.expires_in,
            "Token exchange successful"
        );

        Ok(grant)
    }

    async fn refresh(
        &self,
        provider: &OAuthProviderConfig,
        refresh_token: &str,
    ) -> Result<TokenGrant, ProviderError> {
        tracing::debug!(platform = %provider.platform, "Refreshing access token");

        let grant = self
            .post_form(
                &provider.token_url,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", provider.client_id.as_str()),
                    ("client_secret", provider.client_secret.as_str()),
                ],
            )
            .await?;

        tracing::debug!(
            platform = %provider.platform,
            rotated_refresh_token = grant.refresh_token.is_some(),
            expires_in = grant.expires_in,
            "Token refresh successful"
        );

        Ok(grant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(token_url: String) -> OAuthProviderConfig {
        OAuthProviderConfig {
            platform: "video".to_string(),
            token_url,
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
        }
    }

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "ya29.a0Af",
            "refresh_token": "1//0g",
            "expires_in": 3599,
            "token_type": "Bearer"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let grant = response.into_grant().unwrap();
        assert_eq!(grant.access_token, "ya29.a0Af");
        assert_eq!(grant.refresh_token, Some("1//0g".to_string()));
        assert_eq!(grant.expires_in, 3599);
    }

    #[test]
    fn test_refresh_response_without_refresh_token() {
        let json = r#"{"access_token": "AT2", "expires_in": 3600}"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let grant = response.into_grant().unwrap();
        assert_eq!(grant.refresh_token, None);
    }

    #[test]
    fn test_missing_expires_in_is_rejected() {
        let json = r#"{"access_token": "token_12345"}"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(
            response.into_grant(),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_out_of_range_expires_in_is_rejected() {
        for expires_in in ["0", "-60", "10000000000000", "9223372036854775807"] {
            let json = format!(r#"{{"access_token": "AT", "expires_in": {}}}"#, expires_in);
            let response: TokenResponse = serde_json::from_str(&json).unwrap();
            assert!(
                matches!(response.into_grant(), Err(ProviderError::InvalidResponse(_))),
                "expires_in = {}",
                expires_in
            );
        }

        let json = format!(
            r#"{{"access_token": "AT", "expires_in": {}}}"#,
            MAX_EXPIRES_IN_SECONDS
        );
        let response: TokenResponse = serde_json::from_str(&json).unwrap();
        assert!(response.into_grant().is_ok());
    }

    #[test]
    fn test_missing_access_token_fails_to_parse() {
        let json = r#"{"expires_in": 3600}"#;
        assert!(serde_json::from_str::<TokenResponse>(json).is_err());
    }

    #[tokio::test]
    async fn test_exchange_posts_authorization_code_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "abc".into()),
                mockito::Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "https://app.example.com/api/oauth/video/callback".into(),
                ),
                mockito::Matcher::UrlEncoded("client_id".into(), "client-id".into()),
                mockito::Matcher::UrlEncoded("client_secret".into(), "client-secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"AT1","refresh_token":"RT1","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let endpoint = HttpTokenEndpoint::new(Duration::from_secs(5)).unwrap();
        let grant = endpoint
            .exchange_code(
                &provider(format!("{}/token", server.url())),
                "abc",
                "https://app.example.com/api/oauth/video/callback",
            )
            .await
            .unwrap();

        assert_eq!(grant.access_token, "AT1");
        assert_eq!(grant.refresh_token, Some("RT1".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_posts_refresh_token_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                mockito::Matcher::UrlEncoded("refresh_token".into(), "RT1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"AT2","expires_in":3600}"#)
            .create_async()
            .await;

        let endpoint = HttpTokenEndpoint::new(Duration::from_secs(5)).unwrap();
        let grant = endpoint
            .refresh(&provider(format!("{}/token", server.url())), "RT1")
            .await
            .unwrap();

        assert_eq!(grant.access_token, "AT2");
        assert_eq!(grant.refresh_token, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejection_keeps_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let endpoint = HttpTokenEndpoint::new(Duration::from_secs(5)).unwrap();
        let err = endpoint
            .refresh(&provider(format!("{}/token", server.url())), "revoked")
            .await
            .unwrap_err();

        match err {
            ProviderError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
        assert!(!ProviderError::Rejected { status: 400, body: String::new() }.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Reserve a free port, then close it so nothing is listening there
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = HttpTokenEndpoint::new(Duration::from_secs(2)).unwrap();
        let err = endpoint
            .refresh(&provider(format!("http://127.0.0.1:{}/token", port)), "RT1")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
