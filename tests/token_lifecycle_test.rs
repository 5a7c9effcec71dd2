// Token lifecycle against a mock authorization server and an on-disk store

use chrono::{Duration, Utc};
use linkvault::credentials::{SqliteCredentialStore, TokenEnvelope};
use linkvault::crypto::ServerSecret;
use linkvault::error::ProviderError;
use linkvault::oauth::{HttpTokenEndpoint, LifecycleSettings, OAuthProviderConfig, ProviderRegistry};
use linkvault::vault::Vault;
use linkvault::VaultError;
use std::path::Path;
use std::sync::Arc;

fn open_vault(db_path: &Path, token_url: &str, secret: &str) -> Vault {
    let store = Arc::new(SqliteCredentialStore::new(db_path).unwrap());
    let mut providers = ProviderRegistry::new();
    providers.insert(OAuthProviderConfig {
        platform: "video".to_string(),
        token_url: token_url.to_string(),
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
    });
    Vault::new(
        store,
        Arc::new(HttpTokenEndpoint::new(std::time::Duration::from_secs(5)).unwrap()),
        providers,
        ServerSecret::new(secret),
        LifecycleSettings::default(),
    )
}

/// Records stay readable across restarts as long as the server secret is unchanged.
#[tokio::test]
async fn test_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("credentials.db");

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"AT1","refresh_token":"RT1","expires_in":3600}"#)
        .create_async()
        .await;
    let token_url = format!("{}/token", server.url());

    {
        let vault = open_vault(&db_path, &token_url, "stable-secret");
        vault
            .link_account("u1", "video", "abc", "https://app.example.com/cb")
            .await
            .unwrap();
    }

    let vault = open_vault(&db_path, &token_url, "stable-secret");
    assert_eq!(vault.get_valid_access_token("u1", "video").await.unwrap(), "AT1");

    // A different server secret cannot read them
    let rotated = open_vault(&db_path, &token_url, "rotated-secret");
    let err = rotated.get_valid_access_token("u1", "video").await.unwrap_err();
    assert!(matches!(err, VaultError::DecryptionFailed(_)));
}

/// Many concurrent readers of a near-expiry token cause exactly one refresh call.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_near_expiry_reads_refresh_once() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("credentials.db");

    let mut server = mockito::Server::new_async().await;
    let refresh = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".into(),
            "refresh_token".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"AT2","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let vault = open_vault(&db_path, &format!("{}/token", server.url()), "s");
    let near_expiry = TokenEnvelope {
        access_token: "AT1".to_string(),
        refresh_token: Some("RT1".to_string()),
        expires_at: Some(Utc::now() + Duration::minutes(4)),
    };
    vault
        .lifecycle()
        .seal_and_store("u1", "video", &near_expiry)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let vault = vault.clone();
        handles.push(tokio::spawn(async move {
            vault.get_valid_access_token("u1", "video").await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "AT2");
    }

    refresh.assert_async().await;

    let stored = vault.lifecycle().load_envelope("u1", "video").await.unwrap();
    assert_eq!(stored.refresh_token, Some("RT1".to_string()));
}

/// A revoked refresh token surfaces as RefreshFailed and is not retried.
#[tokio::test]
async fn test_revoked_refresh_token() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("credentials.db");

    let mut server = mockito::Server::new_async().await;
    let refresh = server
        .mock("POST", "/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
        .expect(1)
        .create_async()
        .await;

    let vault = open_vault(&db_path, &format!("{}/token", server.url()), "s");
    let expired = TokenEnvelope {
        access_token: "AT1".to_string(),
        refresh_token: Some("RT-revoked".to_string()),
        expires_at: Some(Utc::now() - Duration::hours(1)),
    };
    vault
        .lifecycle()
        .seal_and_store("u1", "video", &expired)
        .await
        .unwrap();

    let err = vault.get_valid_access_token("u1", "video").await.unwrap_err();
    assert!(matches!(err, VaultError::RefreshFailed(_)));
    assert!(err.requires_reauthorization());
    assert!(!err.is_transient());
    refresh.assert_async().await;
}

/// Concurrent readers of an expired token share one rejected refresh.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_share_rejected_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("credentials.db");

    let mut server = mockito::Server::new_async().await;
    let refresh = server
        .mock("POST", "/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant"}"#)
        .expect(1)
        .create_async()
        .await;

    let vault = open_vault(&db_path, &format!("{}/token", server.url()), "s");
    let expired = TokenEnvelope {
        access_token: "AT1".to_string(),
        refresh_token: Some("RT-revoked".to_string()),
        expires_at: Some(Utc::now() - Duration::minutes(1)),
    };
    vault
        .lifecycle()
        .seal_and_store("u1", "video", &expired)
        .await
        .unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(8));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let vault = vault.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            vault.get_valid_access_token("u1", "video").await
        }));
    }
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, VaultError::RefreshFailed(_)));
    }

    refresh.assert_async().await;
}

/// A provider `expires_in` too large to represent is refused without storing anything.
#[tokio::test]
async fn test_huge_expires_in_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("credentials.db");

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"AT1","expires_in":9223372036854775807}"#)
        .create_async()
        .await;

    let vault = open_vault(&db_path, &format!("{}/token", server.url()), "s");
    let err = vault
        .link_account("u1", "video", "abc", "https://app.example.com/cb")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VaultError::ExchangeFailed(ProviderError::InvalidResponse(_))
    ));
    assert!(vault.list_linked_platforms("u1").await.unwrap().is_empty());
}
