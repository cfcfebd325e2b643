// Integration tests for the token endpoint exchange against a mock Apple server
use std::sync::Arc;
use std::time::Duration;

use apple_auth_strategy::oauth::client_secret::ClientSecretSigner;
use apple_auth_strategy::oauth::token_exchange::{build_http_client, TokenExchanger};
use apple_auth_strategy::settings::StrategyOptions;
use apple_auth_strategy::testing::constants::TEST_CLIENT_ID;
use apple_auth_strategy::testing::TestFixtures;
use apple_auth_strategy::AppleAuthError;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT_URI: &str = "https://app.example.com/auth/apple/callback";

fn exchanger_for(options: &StrategyOptions, timeout: Duration) -> TokenExchanger {
    let signer = Arc::new(ClientSecretSigner::from_options(options).unwrap());
    TokenExchanger::new(options, signer, build_http_client(timeout).unwrap()).unwrap()
}

fn exchanger(server: &MockServer) -> TokenExchanger {
    exchanger_for(
        &TestFixtures::options_for_server(&server.uri()),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_successful_code_exchange() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains(format!("client_id={TEST_CLIENT_ID}")))
        .and(body_string_contains("client_secret="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "id_token": "header.payload.signature",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = exchanger(&server)
        .exchange_code("auth-code-1", REDIRECT_URI)
        .await
        .unwrap();

    assert_eq!(tokens.access_token, "access-1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(tokens.id_token.as_deref(), Some("header.payload.signature"));
    assert_eq!(tokens.expires_in, 3600);
}

#[tokio::test]
async fn test_invalid_grant_is_token_exchange_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let err = exchanger(&server)
        .exchange_code("expired-code", REDIRECT_URI)
        .await
        .unwrap_err();

    match &err {
        AppleAuthError::TokenExchange { status, error } => {
            assert_eq!(*status, 400);
            assert_eq!(error.kind, "invalid_grant");
        }
        other => panic!("expected TokenExchange, got {other:?}"),
    }
    assert_eq!(err.kind(), "invalid_grant");
}

#[tokio::test]
async fn test_unparsable_error_body_is_preserved() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
        .mount(&server)
        .await;

    let err = exchanger(&server)
        .exchange_code("code", REDIRECT_URI)
        .await
        .unwrap_err();

    let AppleAuthError::TokenExchange { status, error } = err else {
        panic!("expected TokenExchange");
    };
    assert_eq!(status, 502);
    assert_eq!(error.kind, "unknown_error");
    assert_eq!(error.raw, "<html>Bad Gateway</html>");
}

#[tokio::test]
async fn test_malformed_success_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = exchanger(&server)
        .exchange_code("code", REDIRECT_URI)
        .await
        .unwrap_err();
    assert!(matches!(err, AppleAuthError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_slow_token_endpoint_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "late"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let exchanger = exchanger_for(
        &TestFixtures::options_for_server(&server.uri()),
        Duration::from_millis(200),
    );
    let err = exchanger.exchange_code("code", REDIRECT_URI).await.unwrap_err();

    assert!(matches!(err, AppleAuthError::NetworkTimeout(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    let options = StrategyOptions {
        token_url: Some("http://127.0.0.1:9/auth/token".to_string()),
        ..TestFixtures::options()
    };

    let err = exchanger_for(&options, Duration::from_secs(5))
        .exchange_code("code", REDIRECT_URI)
        .await
        .unwrap_err();
    assert!(matches!(err, AppleAuthError::Network(_)), "got {err:?}");
}

#[tokio::test]
async fn test_refresh_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = exchanger(&server).refresh("refresh-1").await.unwrap();

    assert_eq!(tokens.access_token, "access-2");
    assert!(tokens.refresh_token.is_none());
    assert!(tokens.id_token.is_none());
}
