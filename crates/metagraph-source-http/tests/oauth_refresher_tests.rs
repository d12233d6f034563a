//! Integration tests for the OAuth refresher using wiremock.

mod common;

use common::*;
use metagraph::error::RefreshError;
use metagraph::traits::CredentialRefresher;
use metagraph_source_http::{OAuthConfig, OAuthRefresher};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_refresher(server: &MockServer) -> OAuthRefresher {
    OAuthRefresher::new(
        OAuthConfig::new(
            format!("{}/oauth/token", server.uri()),
            "metagraph",
            "client-secret",
            "r1",
        )
        .with_scope("schema.read"),
    )
    .unwrap()
}

#[tokio::test]
async fn test_refresh_posts_refresh_token_grant() {
    init_test_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r1"))
        .and(body_string_contains("client_id=metagraph"))
        .and(body_string_contains("scope=schema.read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_token_response("fresh", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let token = create_refresher(&server).refresh_credentials().await.unwrap();

    assert_eq!(token.expose(), "fresh");
    assert!(token.expires_at().is_some());
}

#[tokio::test]
async fn test_unusable_expiry_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh",
            "expires_in": i64::MAX
        })))
        .mount(&server)
        .await;

    let refresher = create_refresher(&server);
    let err = refresher.refresh_credentials().await.unwrap_err();

    assert!(matches!(err, RefreshError::Transient { ref message } if message.contains("expires_in")));
    assert!(refresher.get_token().await.is_err());
}

#[tokio::test]
async fn test_get_token_uses_cache() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_token_response("fresh", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = create_refresher(&server);
    let first = refresher.get_token().await.unwrap();
    let second = refresher.get_token().await.unwrap();

    assert_eq!(first.expose(), second.expose());
}

#[tokio::test]
async fn test_token_within_grace_period_is_refreshed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_token_response("short", 60)))
        .expect(2)
        .mount(&server)
        .await;

    // Default grace period is five minutes, so a one minute token never counts as valid.
    let refresher = create_refresher(&server);
    refresher.get_token().await.unwrap();
    refresher.get_token().await.unwrap();
}

#[tokio::test]
async fn test_rotated_refresh_token_is_used_next_time() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "first",
            "expires_in": 3600,
            "refresh_token": "r2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("refresh_token=r2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_token_response("second", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = create_refresher(&server);
    assert_eq!(refresher.refresh_credentials().await.unwrap().expose(), "first");
    assert_eq!(refresher.refresh_credentials().await.unwrap().expose(), "second");
}

#[tokio::test]
async fn test_invalid_grant_is_grant_expired() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(create_oauth_error("invalid_grant", "Token has been revoked")),
        )
        .mount(&server)
        .await;

    let err = create_refresher(&server)
        .refresh_credentials()
        .await
        .unwrap_err();

    assert!(matches!(err, RefreshError::GrantExpired));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(create_oauth_error("temporarily_unavailable", "try later")),
        )
        .mount(&server)
        .await;

    let err = create_refresher(&server)
        .refresh_credentials()
        .await
        .unwrap_err();

    match err {
        RefreshError::Transient { message } => assert!(message.contains("503")),
        other => panic!("expected transient error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_token_url_is_rejected() {
    let result = OAuthRefresher::new(OAuthConfig::new("not a url", "metagraph", "s", "r"));
    assert!(result.is_err());
}
