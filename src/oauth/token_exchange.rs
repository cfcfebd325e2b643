// Authorization code and refresh token exchange against Apple's token endpoint
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppleAuthError, Result};
use crate::models::TokenSet;
use crate::oauth::client_secret::ClientSecretSigner;
use crate::oauth::error_response::parse_error_response;
use crate::settings::StrategyOptions;
use crate::utils::logging::LoggingHelper;

/// Classify a transport failure as a timeout or a plain network error
#[must_use]
pub fn map_transport_error(error: &reqwest::Error) -> AppleAuthError {
    if error.is_timeout() {
        AppleAuthError::NetworkTimeout(error.to_string())
    } else {
        AppleAuthError::Network(error.to_string())
    }
}

/// Build the HTTP client shared by the token and JWKS calls
///
/// # Errors
///
/// Returns a configuration error if the TLS backend cannot be initialised
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppleAuthError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Performs grant exchanges, one network call each and no retries
pub struct TokenExchanger {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    signer: Arc<ClientSecretSigner>,
}

impl TokenExchanger {
    /// # Errors
    ///
    /// Returns a configuration error if the client id is missing
    pub fn new(
        options: &StrategyOptions,
        signer: Arc<ClientSecretSigner>,
        http_client: reqwest::Client,
    ) -> Result<Self> {
        let client_id = options
            .get_client_id()
            .ok_or_else(|| AppleAuthError::Configuration("client_id is not configured".to_string()))?;

        Ok(Self {
            http_client,
            token_url: options.token_endpoint().to_string(),
            client_id,
            signer,
        })
    }

    /// Exchange an authorization code for tokens
    ///
    /// # Errors
    ///
    /// * `NetworkTimeout` / `Network` on transport failure
    /// * `TokenExchange` when Apple answers with a non-success status
    /// * `MalformedResponse` when a success body cannot be parsed
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet> {
        self.request_tokens(
            "authorization_code",
            &[("code", code), ("redirect_uri", redirect_uri)],
        )
        .await
    }

    /// Obtain a new access token from a refresh token
    ///
    /// Apple issues neither a new refresh token nor, usually, an identity
    /// token on refresh.
    ///
    /// # Errors
    ///
    /// Same as [`Self::exchange_code`]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        self.request_tokens("refresh_token", &[("refresh_token", refresh_token)])
            .await
    }

    async fn request_tokens(&self, grant_type: &str, grant_params: &[(&str, &str)]) -> Result<TokenSet> {
        let client_secret = self.signer.current_secret().await?;

        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("grant_type", grant_type),
        ];
        params.extend_from_slice(grant_params);

        LoggingHelper::log_token_exchange_start(grant_type);
        let response = self
            .http_client
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| map_transport_error(&e))?;
        LoggingHelper::log_token_response_raw(status.as_u16(), &response_text);

        if !status.is_success() {
            return Err(AppleAuthError::TokenExchange {
                status: status.as_u16(),
                error: parse_error_response(&response_text),
            });
        }

        let tokens: TokenSet = serde_json::from_str(&response_text).map_err(|e| {
            AppleAuthError::MalformedResponse(format!("Failed to parse token response: {e}"))
        })?;

        LoggingHelper::log_token_exchange_summary(&tokens);
        Ok(tokens)
    }
}
