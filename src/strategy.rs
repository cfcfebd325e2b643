//! Sign in with Apple strategy
//!
//! [`AppleStrategy`] is what an embedding authentication framework drives.
//! The framework hands it a neutral [`AuthRequest`]; without a `code` the
//! strategy answers with a redirect, with one it runs the full callback flow:
//! code exchange, identity token verification, nonce check, profile mapping
//! and finally the application's [`VerifyCallback`].

use async_trait::async_trait;
use log::debug;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppleAuthError, Result, TokenVerificationError};
use crate::models::{AuthOutcome, AuthRequest, AuthenticateOptions, AuthorizationRequest, Profile, TokenSet};
use crate::oauth::error_response::{self, ProviderError};
use crate::oauth::token_exchange::build_http_client;
use crate::oauth::{
    build_authorization_request, ClientSecretSigner, IdTokenProcessor, JwtValidator, NonceManager,
    TokenExchanger,
};
use crate::settings::{AppleAuthSettings, HttpSettings, StrategyOptions};
use crate::utils::apple::parse_user_param;
use crate::utils::logging::LoggingHelper;

/// Strategy name under which hosts register this strategy
pub const STRATEGY_NAME: &str = "apple";

/// Application hook that turns a verified profile into the host's user
///
/// `request` is only provided when `pass_req_to_callback` is enabled.
/// Returning `Err` refuses the login; the message is surfaced as
/// [`AppleAuthError::Verify`].
#[async_trait]
pub trait VerifyCallback: Send + Sync {
    type User: Send;

    async fn verify(
        &self,
        request: Option<&AuthRequest>,
        access_token: &str,
        refresh_token: Option<&str>,
        profile: Profile,
    ) -> std::result::Result<Self::User, String>;
}

/// Capability interface a host authentication framework drives
#[async_trait]
pub trait Strategy: Send + Sync {
    type User: Send;

    fn name(&self) -> &str;

    /// Redirect to the provider or complete a callback
    ///
    /// # Errors
    ///
    /// Any failure of the flow, classified as an [`AppleAuthError`]
    async fn authenticate(
        &self,
        request: &AuthRequest,
        options: &AuthenticateOptions,
    ) -> Result<AuthOutcome<Self::User>>;

    /// Check the identity token nonce for this request
    ///
    /// # Errors
    ///
    /// Nonce mismatch, replay or absence when one is required
    fn verify_nonce(&self, request: &AuthRequest, nonce_supported: bool, nonce: Option<&str>) -> Result<()>;

    fn parse_error_response(&self, body: &str) -> ProviderError;
}

pub struct AppleStrategy<V> {
    options: StrategyOptions,
    http: HttpSettings,
    client_id: String,
    nonces: Arc<NonceManager>,
    signer: Arc<ClientSecretSigner>,
    exchanger: TokenExchanger,
    validator: JwtValidator,
    verify: V,
}

impl<V: VerifyCallback> AppleStrategy<V> {
    /// Build the strategy from loaded settings
    ///
    /// Signing material is resolved here, so a bad key fails construction
    /// rather than the first login.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the options are incomplete or the
    /// signing key cannot be loaded
    pub fn new(settings: &AppleAuthSettings, verify: V) -> Result<Self> {
        let options = settings.strategy.clone();
        options.validate()?;

        let client_id = options
            .get_client_id()
            .ok_or_else(|| AppleAuthError::Configuration("client_id is not configured".to_string()))?;

        let signer = Arc::new(ClientSecretSigner::from_options(&options)?);
        let http_client = build_http_client(settings.http.request_timeout())?;
        let exchanger = TokenExchanger::new(&options, Arc::clone(&signer), http_client.clone())?;
        let validator = JwtValidator::new(http_client, options.jwks_endpoint(), &settings.jwt_validation);
        let nonces = Arc::new(NonceManager::new(Duration::from_secs(
            settings.jwt_validation.nonce_ttl_seconds,
        )));

        LoggingHelper::log_strategy_configured(&client_id, options.verify_nonce, options.state);

        Ok(Self {
            options,
            http: settings.http.clone(),
            client_id,
            nonces,
            signer,
            exchanger,
            validator,
            verify,
        })
    }

    /// Build the strategy from options alone, with default HTTP and
    /// validation settings
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`]
    pub fn from_options(options: StrategyOptions, verify: V) -> Result<Self> {
        let settings = AppleAuthSettings {
            strategy: options,
            ..AppleAuthSettings::default()
        };
        Self::new(&settings, verify)
    }

    /// Build the redirect to Apple without going through `authenticate`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no callback URL is known
    pub fn authorization_request(&self, options: &AuthenticateOptions) -> Result<AuthorizationRequest> {
        build_authorization_request(&self.options, options, &self.nonces)
    }

    /// Exchange a refresh token for a new access token
    ///
    /// # Errors
    ///
    /// Same failures as the code exchange
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        self.exchanger.refresh(refresh_token).await
    }

    #[must_use]
    pub fn client_secret_signer(&self) -> &ClientSecretSigner {
        &self.signer
    }

    #[must_use]
    pub fn nonce_manager(&self) -> &NonceManager {
        &self.nonces
    }

    /// Session key under which hosts keep state and nonce
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.options.session_key
    }

    fn check_state(&self, request: &AuthRequest, options: &AuthenticateOptions) -> Result<()> {
        let expected = request.saved_state().or(options.state.as_deref());
        if !self.options.state && expected.is_none() {
            return Ok(());
        }

        match (expected, request.param("state")) {
            (Some(expected), Some(received)) if expected == received => Ok(()),
            _ => Err(AppleAuthError::StateMismatch),
        }
    }

    /// Exchange the code and verify the identity token it yields
    async fn verify_callback(
        &self,
        request: &AuthRequest,
        options: &AuthenticateOptions,
        code: &str,
    ) -> Result<(TokenSet, Profile)> {
        self.check_state(request, options)?;

        let redirect_uri = options
            .callback_url
            .as_deref()
            .or(self.options.callback_url.as_deref())
            .ok_or_else(|| AppleAuthError::Configuration("callback_url is not configured".to_string()))?;

        let tokens = self.exchanger.exchange_code(code, redirect_uri).await?;
        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            AppleAuthError::MalformedResponse("token response carries no id_token".to_string())
        })?;

        let claims = self.validator.validate_id_token(id_token, &self.client_id).await?;

        // A nonce passed in the per-request options stands in for a saved one
        let nonce_request = match (request.saved_nonce(), &options.nonce) {
            (None, Some(nonce)) => Cow::Owned(request.clone().with_saved_nonce(nonce.clone())),
            _ => Cow::Borrowed(request),
        };
        self.verify_nonce(
            &nonce_request,
            IdTokenProcessor::nonce_supported(&claims),
            claims.nonce.as_deref(),
        )?;

        let user_info = request.param("user").and_then(parse_user_param);
        let profile = IdTokenProcessor::build_profile(&claims, user_info.as_ref())?;
        LoggingHelper::log_profile_verified(&profile);

        Ok((tokens, profile))
    }

    /// Run the provider round trips under the flow timeout, then hand the
    /// profile to the application
    ///
    /// The nonce of a failed attempt is discarded so it cannot be redeemed
    /// by a later callback.
    async fn complete_callback(
        &self,
        request: &AuthRequest,
        options: &AuthenticateOptions,
        code: &str,
    ) -> Result<AuthOutcome<V::User>> {
        let flow_timeout = self.http.flow_timeout();
        let verified = tokio::time::timeout(flow_timeout, self.verify_callback(request, options, code))
            .await
            .unwrap_or_else(|_| {
                Err(AppleAuthError::NetworkTimeout(format!(
                    "authentication flow exceeded {flow_timeout:?}"
                )))
            });

        let (tokens, profile) = match verified {
            Ok(verified) => verified,
            Err(err) => {
                if let Some(nonce) = request.saved_nonce().or(options.nonce.as_deref()) {
                    self.nonces.discard(nonce);
                }
                return Err(err);
            }
        };

        let callback_request = self.options.pass_req_to_callback.then_some(request);
        let user = self
            .verify
            .verify(
                callback_request,
                &tokens.access_token,
                tokens.refresh_token.as_deref(),
                profile,
            )
            .await
            .map_err(AppleAuthError::Verify)?;

        Ok(AuthOutcome::Success(user))
    }
}

#[async_trait]
impl<V: VerifyCallback> Strategy for AppleStrategy<V> {
    type User = V::User;

    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    async fn authenticate(
        &self,
        request: &AuthRequest,
        options: &AuthenticateOptions,
    ) -> Result<AuthOutcome<Self::User>> {
        if let Some(error) = request.param("error") {
            let err = AppleAuthError::Provider(error_response::from_callback_error(
                error,
                request.param("error_description"),
            ));
            LoggingHelper::log_flow_failed(&err);
            return Err(err);
        }

        let Some(code) = request.param("code") else {
            return self.authorization_request(options).map(AuthOutcome::Redirect);
        };

        let result = self.complete_callback(request, options, code).await;
        if let Err(err) = &result {
            LoggingHelper::log_flow_failed(err);
        }
        result
    }

    fn verify_nonce(&self, request: &AuthRequest, nonce_supported: bool, nonce: Option<&str>) -> Result<()> {
        if !self.options.verify_nonce {
            debug!("Nonce verification disabled, skipping");
            return Ok(());
        }
        if !nonce_supported {
            debug!("Identity token reports nonce_supported=false, skipping nonce check");
            return Ok(());
        }

        match (request.saved_nonce(), nonce) {
            (Some(expected), supplied) => self.nonces.verify(supplied, expected),
            // No saved nonce: the token's own nonce must be one we issued
            (None, Some(claim)) => self.nonces.verify(Some(claim), claim),
            (None, None) => Err(TokenVerificationError::NonceInvalid(
                "identity token carries no nonce".to_string(),
            )
            .into()),
        }
    }

    fn parse_error_response(&self, body: &str) -> ProviderError {
        error_response::parse_error_response(body)
    }
}
