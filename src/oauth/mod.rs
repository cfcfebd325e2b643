//! Sign in with Apple protocol components
//!
//! Authorization URL building, client secret signing, code exchange, nonce
//! bookkeeping and identity token verification. The strategy in
//! [`crate::strategy`] wires these together into one flow.

pub mod authorization;
pub mod client_secret;
pub mod error_response;
pub mod jwt_validation;
pub mod nonce;
pub mod token_exchange;
pub mod token_processor;

pub use authorization::build_authorization_request;
pub use client_secret::ClientSecretSigner;
pub use error_response::{parse_error_response, ProviderError};
pub use jwt_validation::{IdTokenClaims, JwtValidator};
pub use nonce::NonceManager;
pub use token_exchange::TokenExchanger;
pub use token_processor::IdTokenProcessor;

use crate::error::{AppleAuthError, Result};
use crate::oauth::token_exchange::map_transport_error;

/// Extract the `max-age` directive of a `Cache-Control` header
#[must_use]
pub fn parse_max_age(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.split(',').find_map(|directive| {
                directive
                    .trim()
                    .strip_prefix("max-age=")
                    .and_then(|seconds| seconds.parse::<u64>().ok())
            })
        })
}

/// Fetch JWKS (JSON Web Key Set) from the given URL
///
/// Returns the document together with the `max-age` the server advertised.
///
/// # Errors
///
/// Returns an error if:
/// - The request times out (`NetworkTimeout`) or fails (`Network`)
/// - The server answers with a non-success status (`Network`)
/// - Response is not valid JSON (`MalformedResponse`)
pub async fn fetch_jwks(
    client: &reqwest::Client,
    jwks_uri: &str,
) -> Result<(serde_json::Value, Option<u64>)> {
    log::debug!("Fetching JWKS from: {jwks_uri}");

    let response = client
        .get(jwks_uri)
        .send()
        .await
        .map_err(|e| map_transport_error(&e))?;

    if !response.status().is_success() {
        return Err(AppleAuthError::Network(format!(
            "JWKS request failed with status: {}",
            response.status()
        )));
    }

    let max_age = parse_max_age(response.headers());
    let body = response.text().await.map_err(|e| map_transport_error(&e))?;
    let jwks: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| AppleAuthError::MalformedResponse(format!("Failed to parse JWKS JSON: {e}")))?;

    log::debug!("Successfully fetched JWKS");
    Ok((jwks, max_age))
}
