// Centralized logging utilities for the authentication flow
use log::{debug, info, warn};

use crate::error::AppleAuthError;
use crate::models::{Profile, TokenSet};

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log strategy construction
    pub fn log_strategy_configured(client_id: &str, verify_nonce: bool, state: bool) {
        info!(
            "✅ Sign in with Apple configured for {client_id} (verify_nonce={verify_nonce}, state={state})"
        );
        if !verify_nonce {
            warn!("Nonce verification is disabled; identity tokens are not bound to a login attempt");
        }
    }

    /// Log authorization URL building
    pub fn log_authorization_url_built(scope: &str, response_mode: &str, has_state: bool, has_nonce: bool) {
        info!(
            "🔍 Built Apple authorization URL with scope '{scope}' (response_mode={response_mode}, state={}, nonce={})",
            if has_state { "present" } else { "none" },
            if has_nonce { "present" } else { "none" }
        );
    }

    /// Log token exchange start
    pub fn log_token_exchange_start(grant_type: &str) {
        info!("🔄 Exchanging {grant_type} grant with Apple");
    }

    /// Log token exchange summary without exposing token values
    pub fn log_token_exchange_summary(tokens: &TokenSet) {
        info!(
            "🔍 Token exchange summary: refresh_token={}, id_token={}, token_type={}, expires_in={}",
            tokens.refresh_token.as_ref().map_or("missing", |_| "present"),
            tokens.id_token.as_ref().map_or("missing", |_| "present"),
            tokens.token_type,
            tokens.expires_in
        );
    }

    /// Log the raw provider response for debugging
    ///
    /// Success bodies carry tokens, so only error bodies are echoed.
    pub fn log_token_response_raw(status: u16, response_text: &str) {
        if let Some(line) = Self::token_response_log_line(status, response_text) {
            debug!("{line}");
        }
    }

    fn token_response_log_line(status: u16, response_text: &str) -> Option<String> {
        if (200..300).contains(&status) {
            return None;
        }
        let preview: String = response_text.chars().take(120).collect();
        Some(format!("Raw Apple token error response ({status}): {preview}"))
    }

    /// Log a verified profile
    pub fn log_profile_verified(profile: &Profile) {
        info!(
            "✅ Verified Apple identity {} (email_verified={}, private_relay={}, name={})",
            profile.id(),
            profile.email_verified(),
            profile.is_private_email(),
            if profile.name().is_some() { "present" } else { "missing" }
        );
    }

    /// Log a failed authentication attempt
    pub fn log_flow_failed(error: &AppleAuthError) {
        warn!("❌ Sign in with Apple failed [{}]: {error}", error.kind());
    }

    /// Log a JWKS refresh
    pub fn log_jwks_refreshed(key_count: usize, max_age: Option<u64>) {
        match max_age {
            Some(seconds) => info!("🔑 Fetched {key_count} Apple signing keys (max-age {seconds}s)"),
            None => info!("🔑 Fetched {key_count} Apple signing keys (fallback cache duration)"),
        }
    }
}
