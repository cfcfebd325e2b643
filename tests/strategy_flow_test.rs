// End-to-end Sign in with Apple flows against mocked token and key endpoints
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apple_auth_strategy::settings::{AppleAuthSettings, HttpSettings};
use apple_auth_strategy::testing::constants::{TEST_EMAIL, TEST_SUBJECT};
use apple_auth_strategy::testing::TestFixtures;
use apple_auth_strategy::{
    AppleAuthError, AppleStrategy, AuthOutcome, AuthRequest, AuthenticateOptions, Profile,
    Strategy, StrategyOptions, TokenVerificationError, VerifyCallback,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Clone, Default)]
struct RecordingCallback {
    calls: Arc<AtomicUsize>,
    saw_request: Arc<AtomicBool>,
    refuse: bool,
    delay: Option<Duration>,
}

#[async_trait]
impl VerifyCallback for RecordingCallback {
    type User = Profile;

    async fn verify(
        &self,
        request: Option<&AuthRequest>,
        access_token: &str,
        _refresh_token: Option<&str>,
        profile: Profile,
    ) -> Result<Profile, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.saw_request.store(request.is_some(), Ordering::SeqCst);
        assert_eq!(access_token, "access-1");

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.refuse {
            return Err("account suspended".to_string());
        }
        Ok(profile)
    }
}

async fn mount_apple(server: &MockServer, id_token: &str) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "id_token": id_token,
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/auth/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(TestFixtures::jwks_document()))
        .mount(server)
        .await;
}

fn strategy_with(
    options: StrategyOptions,
    callback: RecordingCallback,
) -> AppleStrategy<RecordingCallback> {
    AppleStrategy::from_options(options, callback).unwrap()
}

fn callback_request(nonce: Option<&str>) -> AuthRequest {
    let request = AuthRequest::new().with_param("code", "auth-code-1");
    match nonce {
        Some(nonce) => request.with_saved_nonce(nonce),
        None => request,
    }
}

#[tokio::test]
async fn test_full_flow_with_first_login_user() {
    let server = MockServer::start().await;
    let callback = RecordingCallback::default();
    let strategy = strategy_with(
        TestFixtures::options_for_server(&server.uri()),
        callback.clone(),
    );

    // Step 1: redirect to Apple
    let outcome = strategy
        .authenticate(&AuthRequest::new(), &AuthenticateOptions::default())
        .await
        .unwrap();
    let AuthOutcome::Redirect(redirect) = outcome else {
        panic!("expected redirect");
    };
    let nonce = redirect.nonce.expect("nonce issued");
    assert!(redirect.url.starts_with(&format!("{}/auth/authorize?", server.uri())));
    assert!(redirect.url.contains("response_mode=form_post"));

    // Step 2: Apple posts back with the code and the user parameter
    let id_token = TestFixtures::sign_id_token(&TestFixtures::id_token_claims(Some(&nonce)));
    mount_apple(&server, &id_token).await;

    let request = callback_request(Some(&nonce))
        .with_param("user", &TestFixtures::first_login_user_param());
    let outcome = strategy
        .authenticate(&request, &AuthenticateOptions::default())
        .await
        .unwrap();

    let AuthOutcome::Success(profile) = outcome else {
        panic!("expected success");
    };
    assert_eq!(profile.id(), TEST_SUBJECT);
    assert_eq!(profile.provider(), "apple");
    assert_eq!(profile.email(), Some(TEST_EMAIL));
    assert!(profile.email_verified());
    assert_eq!(profile.name().unwrap().full_name(), "Jane Appleseed");

    assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
    assert!(!callback.saw_request.load(Ordering::SeqCst));
    assert!(!strategy.nonce_manager().is_pending(&nonce));
}

#[tokio::test]
async fn test_replayed_nonce_is_rejected() {
    let server = MockServer::start().await;
    let strategy = strategy_with(
        TestFixtures::options_for_server(&server.uri()),
        RecordingCallback::default(),
    );

    let nonce = strategy.nonce_manager().issue();
    let id_token = TestFixtures::sign_id_token(&TestFixtures::id_token_claims(Some(&nonce)));
    mount_apple(&server, &id_token).await;

    let request = callback_request(Some(&nonce));
    let first = strategy
        .authenticate(&request, &AuthenticateOptions::default())
        .await;
    assert!(matches!(first, Ok(AuthOutcome::Success(_))));

    let second = strategy
        .authenticate(&request, &AuthenticateOptions::default())
        .await;
    assert!(matches!(second, Err(AppleAuthError::NonceReplay)));
}

#[tokio::test]
async fn test_nonce_mismatch_is_rejected() {
    let server = MockServer::start().await;
    let callback = RecordingCallback::default();
    let strategy = strategy_with(
        TestFixtures::options_for_server(&server.uri()),
        callback.clone(),
    );

    let issued = strategy.nonce_manager().issue();
    let id_token =
        TestFixtures::sign_id_token(&TestFixtures::id_token_claims(Some("attacker-nonce")));
    mount_apple(&server, &id_token).await;

    let err = strategy
        .authenticate(&callback_request(Some(&issued)), &AuthenticateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppleAuthError::NonceMismatch(_)));
    assert_eq!(callback.calls.load(Ordering::SeqCst), 0);
    assert!(!strategy.nonce_manager().is_pending(&issued));
}

#[tokio::test]
async fn test_nonce_verification_disabled() {
    let server = MockServer::start().await;
    let options = StrategyOptions {
        verify_nonce: false,
        ..TestFixtures::options_for_server(&server.uri())
    };
    let strategy = strategy_with(options, RecordingCallback::default());

    let AuthOutcome::Redirect(redirect) = strategy
        .authenticate(&AuthRequest::new(), &AuthenticateOptions::default())
        .await
        .unwrap()
    else {
        panic!("expected redirect");
    };
    assert!(redirect.nonce.is_none());
    assert!(!redirect.url.contains("nonce="));

    let id_token = TestFixtures::sign_id_token(&TestFixtures::id_token_claims(None));
    mount_apple(&server, &id_token).await;

    let outcome = strategy
        .authenticate(&callback_request(None), &AuthenticateOptions::default())
        .await;
    assert!(matches!(outcome, Ok(AuthOutcome::Success(_))));
}

#[tokio::test]
async fn test_expired_identity_token_never_reaches_callback() {
    let server = MockServer::start().await;
    let callback = RecordingCallback::default();
    let strategy = strategy_with(
        TestFixtures::options_for_server(&server.uri()),
        callback.clone(),
    );

    let nonce = strategy.nonce_manager().issue();
    let mut claims = TestFixtures::id_token_claims(Some(&nonce));
    claims["exp"] = json!(Utc::now().timestamp() - 1);
    mount_apple(&server, &TestFixtures::sign_id_token(&claims)).await;

    let err = strategy
        .authenticate(&callback_request(Some(&nonce)), &AuthenticateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppleAuthError::TokenVerification(TokenVerificationError::Expired)
    ));
    assert_eq!(callback.calls.load(Ordering::SeqCst), 0);
    assert!(!strategy.nonce_manager().is_pending(&nonce));
}

#[tokio::test]
async fn test_failed_code_exchange_discards_nonce() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let strategy = strategy_with(
        TestFixtures::options_for_server(&server.uri()),
        RecordingCallback::default(),
    );
    let nonce = strategy.nonce_manager().issue();

    let err = strategy
        .authenticate(&callback_request(Some(&nonce)), &AuthenticateOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_grant");
    assert!(!strategy.nonce_manager().is_pending(&nonce));
    assert!(matches!(
        strategy.nonce_manager().verify(Some(&nonce), &nonce),
        Err(AppleAuthError::NonceReplay)
    ));
}

#[tokio::test]
async fn test_verify_callback_refusal() {
    let server = MockServer::start().await;
    let callback = RecordingCallback {
        refuse: true,
        ..RecordingCallback::default()
    };
    let options = StrategyOptions {
        pass_req_to_callback: true,
        ..TestFixtures::options_for_server(&server.uri())
    };
    let strategy = strategy_with(options, callback.clone());

    let nonce = strategy.nonce_manager().issue();
    let id_token = TestFixtures::sign_id_token(&TestFixtures::id_token_claims(Some(&nonce)));
    mount_apple(&server, &id_token).await;

    let err = strategy
        .authenticate(&callback_request(Some(&nonce)), &AuthenticateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppleAuthError::Verify(ref msg) if msg == "account suspended"));
    assert!(callback.saw_request.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_missing_id_token_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "access-1"})))
        .mount(&server)
        .await;

    let strategy = strategy_with(
        TestFixtures::options_for_server(&server.uri()),
        RecordingCallback::default(),
    );
    let err = strategy
        .authenticate(&callback_request(None), &AuthenticateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppleAuthError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_flow_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "access-1"}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let settings = AppleAuthSettings {
        strategy: TestFixtures::options_for_server(&server.uri()),
        http: HttpSettings {
            request_timeout_seconds: 10,
            flow_timeout_seconds: 1,
        },
        ..AppleAuthSettings::default()
    };
    let strategy = AppleStrategy::new(&settings, RecordingCallback::default()).unwrap();

    let err = strategy
        .authenticate(&callback_request(None), &AuthenticateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppleAuthError::NetworkTimeout(_)), "got {err:?}");
}

#[tokio::test]
async fn test_slow_verify_callback_is_outside_flow_timeout() {
    let server = MockServer::start().await;
    let callback = RecordingCallback {
        delay: Some(Duration::from_millis(1500)),
        ..RecordingCallback::default()
    };
    let settings = AppleAuthSettings {
        strategy: TestFixtures::options_for_server(&server.uri()),
        http: HttpSettings {
            request_timeout_seconds: 10,
            flow_timeout_seconds: 1,
        },
        ..AppleAuthSettings::default()
    };
    let strategy = AppleStrategy::new(&settings, callback.clone()).unwrap();

    let nonce = strategy.nonce_manager().issue();
    let id_token = TestFixtures::sign_id_token(&TestFixtures::id_token_claims(Some(&nonce)));
    mount_apple(&server, &id_token).await;

    let outcome = strategy
        .authenticate(&callback_request(Some(&nonce)), &AuthenticateOptions::default())
        .await;

    assert!(matches!(outcome, Ok(AuthOutcome::Success(_))), "got {outcome:?}");
    assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
}
