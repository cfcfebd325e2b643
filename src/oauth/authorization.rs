// Authorization endpoint URL construction
use crate::error::{AppleAuthError, Result};
use crate::models::{AuthenticateOptions, AuthorizationRequest};
use crate::oauth::nonce::NonceManager;
use crate::settings::StrategyOptions;
use crate::utils::crypto::generate_state;
use crate::utils::logging::LoggingHelper;

/// Apple only accepts `form_post` when name or email scopes are requested
#[must_use]
pub fn response_mode(scope: &[String]) -> &'static str {
    if scope.is_empty() {
        "query"
    } else {
        "form_post"
    }
}

/// Build the redirect to Apple's authorization endpoint
///
/// Per-request options take precedence over the strategy options. A state is
/// generated when the state flag is on and none is supplied; a nonce is
/// issued (or the supplied one recorded) unless nonce verification is off.
///
/// # Errors
///
/// Returns a configuration error if the client id or callback URL is missing
/// or the authorization endpoint is not a valid URL
pub fn build_authorization_request(
    options: &StrategyOptions,
    request_options: &AuthenticateOptions,
    nonces: &NonceManager,
) -> Result<AuthorizationRequest> {
    let client_id = options
        .get_client_id()
        .ok_or_else(|| AppleAuthError::Configuration("client_id is not configured".to_string()))?;

    let redirect_uri = request_options
        .callback_url
        .as_deref()
        .or(options.callback_url.as_deref())
        .ok_or_else(|| AppleAuthError::Configuration("callback_url is not configured".to_string()))?;

    let scope = request_options.scope.as_ref().unwrap_or(&options.scope);
    let scope_param = scope.join(" ");
    let mode = response_mode(scope);

    let state = match &request_options.state {
        Some(state) => Some(state.clone()),
        None if options.state => Some(generate_state()),
        None => None,
    };

    let nonce = if options.verify_nonce {
        Some(match &request_options.nonce {
            Some(nonce) => {
                nonces.record(nonce);
                nonce.clone()
            }
            None => nonces.issue(),
        })
    } else {
        None
    };

    let mut url = url::Url::parse(options.authorization_endpoint()).map_err(|e| {
        AppleAuthError::Configuration(format!("Invalid authorization_url: {e}"))
    })?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code");
        if !scope_param.is_empty() {
            query.append_pair("scope", &scope_param);
        }
        if let Some(state) = &state {
            query.append_pair("state", state);
        }
        if let Some(nonce) = &nonce {
            query.append_pair("nonce", nonce);
        }
        query.append_pair("response_mode", mode);
    }

    LoggingHelper::log_authorization_url_built(&scope_param, mode, state.is_some(), nonce.is_some());

    Ok(AuthorizationRequest {
        url: url.to_string(),
        state,
        nonce,
    })
}
