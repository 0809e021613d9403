//! Wire-format tests for the Supabase identity provider, against mockito.

use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;
use todo_core::{
    ApiError, AuthStore, IdentityProvider, MemoryStorage, PersistedSession, ReqwestTransport,
    SupabaseAuth,
};

fn provider(url: &str) -> SupabaseAuth {
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap());
    SupabaseAuth::new(url, "anon-key", transport)
}

const SESSION_BODY: &str = r#"{
    "access_token": "a2",
    "refresh_token": "r2",
    "token_type": "bearer",
    "expires_in": 3600,
    "user": {
        "id": "u1",
        "email": "ada@example.com",
        "user_metadata": { "full_name": "Ada Lovelace", "avatar_url": "https://img/ada.png" }
    }
}"#;

#[tokio::test]
async fn refresh_posts_refresh_token_grant() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .match_header("apikey", "anon-key")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({ "refresh_token": "r1" })))
        .with_status(200)
        .with_body(SESSION_BODY)
        .create_async()
        .await;

    let session = provider(&server.url()).refresh_session("r1").await.unwrap();

    m.assert_async().await;
    assert_eq!(session.access_token, "a2");
    assert_eq!(session.refresh_token, "r2");
    assert_eq!(session.user.name, "Ada Lovelace");
    assert_eq!(session.user.avatar_url, "https://img/ada.png");
}

#[tokio::test]
async fn exchange_sends_code_and_stored_verifier() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "pkce".into()))
        .match_header("apikey", "anon-key")
        .match_body(Matcher::Json(json!({
            "auth_code": "code-123",
            "code_verifier": "verifier-xyz"
        })))
        .with_status(200)
        .with_body(SESSION_BODY)
        .create_async()
        .await;

    let auth = provider(&server.url());
    auth.set_code_verifier("verifier-xyz");
    let session = auth
        .exchange_code("code-123", "http://localhost:5173/auth/callback")
        .await
        .unwrap();
    m.assert_async().await;
    assert_eq!(session.user.email, "ada@example.com");

    // The verifier is single-use.
    let err = auth
        .exchange_code("code-123", "http://localhost:5173/auth/callback")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn get_user_sends_bearer_and_maps_profile() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("GET", "/auth/v1/user")
        .match_header("authorization", "Bearer a1")
        .match_header("apikey", "anon-key")
        .with_status(200)
        .with_body(r#"{"id":"42","email":"a@b.com","user_metadata":{"picture":"p.png"}}"#)
        .create_async()
        .await;

    let user = provider(&server.url()).get_user("a1").await.unwrap();

    m.assert_async().await;
    assert_eq!(user.id, "42");
    assert_eq!(user.name, "a");
    assert_eq!(user.avatar_url, "p.png");
}

#[tokio::test]
async fn invalid_grant_is_http_error() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .match_header("apikey", "anon-key")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#)
        .create_async()
        .await;

    let err = provider(&server.url()).refresh_session("stale").await.unwrap_err();
    m.assert_async().await;
    assert!(matches!(err, ApiError::HttpError { status: 400, ref body } if body.contains("invalid_grant")));
}

#[tokio::test]
async fn session_without_user_is_validation_error() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .match_header("apikey", "anon-key")
        .with_status(200)
        .with_body(r#"{"access_token":"a2","refresh_token":"r2"}"#)
        .create_async()
        .await;

    let err = provider(&server.url()).refresh_session("r1").await.unwrap_err();
    m.assert_async().await;
    assert!(matches!(err, ApiError::Validation(_)), "{err:?}");
}

#[tokio::test]
async fn store_refresh_hits_provider_once_for_concurrent_callers() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/auth/v1/token")
        .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .with_status(200)
        .with_body(SESSION_BODY)
        .expect(1)
        .create_async()
        .await;

    let store = AuthStore::new(
        Arc::new(provider(&server.url())),
        Arc::new(MemoryStorage::with_session(PersistedSession {
            refresh_token: Some("r1".into()),
            ..PersistedSession::default()
        })),
    );

    let (a, b) = tokio::join!(store.refresh_auth(), store.refresh_auth());
    assert_eq!(a.unwrap(), b.unwrap());
    m.assert_async().await;
    assert_eq!(store.access_token().as_deref(), Some("a2"));
}
