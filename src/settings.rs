use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::error::AppleAuthError;
use crate::utils::duration::{parse_duration, MAX_CLIENT_SECRET_LIFETIME};

/// Apple's authorization endpoint
pub const APPLE_AUTHORIZATION_URL: &str = "https://appleid.apple.com/auth/authorize";
/// Apple's token endpoint
pub const APPLE_TOKEN_URL: &str = "https://appleid.apple.com/auth/token";
/// Apple's published identity token signing keys
pub const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
/// Issuer of Apple identity tokens and audience of client secrets
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppleAuthSettings {
    pub strategy: StrategyOptions,
    pub jwt_validation: JwtValidationConfig,
    pub http: HttpSettings,
    pub logging: LoggingSettings,
}

/// Construction-time configuration of the strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOptions {
    // Direct values (can be overridden by environment variables)
    pub client_id: Option<String>,
    pub team_id: Option<String>,
    pub key_id: Option<String>,
    /// Inline PEM-encoded PKCS#8 private key
    pub key: Option<String>,
    pub key_file_path: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub team_id_env: Option<String>,
    pub key_id_env: Option<String>,
    pub key_file_path_env: Option<String>,

    pub authorization_url: Option<String>,
    pub token_url: Option<String>,
    pub jwks_url: Option<String>,
    pub scope: Vec<String>,
    pub session_key: String,
    /// Generate a random `state` when the request does not supply one
    pub state: bool,
    /// Hand the incoming request to the verify callback
    pub pass_req_to_callback: bool,
    pub callback_url: Option<String>,
    /// Lifetime of generated client secrets, e.g. `"6 months"` or `"5 minutes"`
    pub client_secret_expiry: String,
    pub verify_nonce: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtValidationConfig {
    /// Expected `iss` claim of identity tokens
    #[serde(default = "default_issuer")]
    pub expected_issuer: String,

    /// Clock skew tolerance in seconds (default: 300 = 5 minutes)
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,

    /// JWKS cache duration when the response carries no `max-age` (default: 3600 = 1 hour)
    #[serde(default = "default_cache_duration")]
    pub cache_duration_seconds: u64,

    /// How long an issued nonce stays redeemable (default: 600 = 10 minutes)
    #[serde(default = "default_nonce_ttl")]
    pub nonce_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Timeout applied to each call to Apple (default: 10 seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Upper bound for the provider side of a callback (default: 30 seconds)
    ///
    /// Covers the code exchange, key fetching and token verification. The
    /// application's verify callback runs outside this budget.
    #[serde(default = "default_flow_timeout")]
    pub flow_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

// Helper functions for serde defaults
fn default_issuer() -> String { APPLE_ISSUER.to_string() }
fn default_clock_skew() -> u64 { 300 }
fn default_cache_duration() -> u64 { 3600 }
fn default_nonce_ttl() -> u64 { 600 }
fn default_request_timeout() -> u64 { 10 }
fn default_flow_timeout() -> u64 { 30 }

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            team_id: None,
            key_id: None,
            key: None,
            key_file_path: None,
            client_id_env: None,
            team_id_env: None,
            key_id_env: None,
            key_file_path_env: None,
            authorization_url: None,
            token_url: None,
            jwks_url: None,
            scope: Vec::new(),
            session_key: "apple-auth-session".to_string(),
            state: false,
            pass_req_to_callback: false,
            callback_url: None,
            client_secret_expiry: "6 months".to_string(),
            verify_nonce: true,
        }
    }
}

impl Default for JwtValidationConfig {
    fn default() -> Self {
        Self {
            expected_issuer: default_issuer(),
            clock_skew_seconds: default_clock_skew(),
            cache_duration_seconds: default_cache_duration(),
            nonce_ttl_seconds: default_nonce_ttl(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            flow_timeout_seconds: default_flow_timeout(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppleAuthSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Settings.toml in `APPLE_AUTH_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_env_file();

        let (mut settings, sources) = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);

        // The level may come from Settings.toml, so the logger starts only
        // now and the file lookups are reported afterwards
        settings.init_logging();
        for source in &sources {
            log::info!("{source}");
        }

        Ok(settings)
    }

    /// Initialise `env_logger` with the configured level
    ///
    /// A logger installed earlier by the embedding application is left in place.
    pub fn init_logging(&self) {
        if env_logger::Builder::new()
            .parse_filters(&self.logging.level)
            .try_init()
            .is_err()
        {
            log::debug!("Logger already initialised, keeping existing logger");
        }
    }

    /// Read Settings.toml files, returning the settings and a note per lookup
    fn load_base_settings() -> Result<(Self, Vec<String>), Box<dyn std::error::Error>> {
        let mut settings = Self::default();
        let mut sources = Vec::new();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            let toml_content = fs::read_to_string(&default_config_path)?;
            settings = basic_toml::from_str(&toml_content)?;
            sources.push(format!("Loaded base settings from {}", default_config_path.display()));
        }

        if let Ok(secrets_dir) = std::env::var("APPLE_AUTH_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                let secrets_toml_content = fs::read_to_string(&secrets_path)?;
                settings = basic_toml::from_str(&secrets_toml_content)?;
                sources.push(format!("Overriding settings from {}", secrets_path.display()));
            } else {
                sources.push(format!(
                    "APPLE_AUTH_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                ));
            }
        }

        Ok((settings, sources))
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        if let Ok(callback_url) = std::env::var("APPLE_CALLBACK_URL") {
            settings.strategy.callback_url = Some(callback_url);
        }
        Self::apply_numeric_env_override(
            "APPLE_AUTH_REQUEST_TIMEOUT_SECONDS",
            &mut settings.http.request_timeout_seconds,
        );
        Self::apply_numeric_env_override(
            "APPLE_AUTH_FLOW_TIMEOUT_SECONDS",
            &mut settings.http.flow_timeout_seconds,
        );
        Self::apply_numeric_env_override(
            "APPLE_AUTH_CLOCK_SKEW_SECONDS",
            &mut settings.jwt_validation.clock_skew_seconds,
        );
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            settings.logging.level = log_level;
        }
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }
}

impl HttpSettings {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    #[must_use]
    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_seconds)
    }
}

/// Check the environment variable first, then fall back to the direct value
fn env_or_value(env_var: Option<&String>, value: Option<&String>) -> Option<String> {
    if let Some(env_var) = env_var {
        if let Ok(value) = std::env::var(env_var) {
            return Some(value);
        }
    }
    value.cloned()
}

impl StrategyOptions {
    /// Get the client ID (Services ID), checking environment variable first
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        env_or_value(self.client_id_env.as_ref(), self.client_id.as_ref())
    }

    /// Get the team ID, checking environment variable first
    #[must_use]
    pub fn get_team_id(&self) -> Option<String> {
        env_or_value(self.team_id_env.as_ref(), self.team_id.as_ref())
    }

    /// Get the key ID, checking environment variable first
    #[must_use]
    pub fn get_key_id(&self) -> Option<String> {
        env_or_value(self.key_id_env.as_ref(), self.key_id.as_ref())
    }

    /// Get the private key path, checking environment variable first
    #[must_use]
    pub fn get_key_file_path(&self) -> Option<String> {
        env_or_value(self.key_file_path_env.as_ref(), self.key_file_path.as_ref())
    }

    #[must_use]
    pub fn authorization_endpoint(&self) -> &str {
        self.authorization_url.as_deref().unwrap_or(APPLE_AUTHORIZATION_URL)
    }

    #[must_use]
    pub fn token_endpoint(&self) -> &str {
        self.token_url.as_deref().unwrap_or(APPLE_TOKEN_URL)
    }

    #[must_use]
    pub fn jwks_endpoint(&self) -> &str {
        self.jwks_url.as_deref().unwrap_or(APPLE_JWKS_URL)
    }

    /// Parsed client secret lifetime, capped at Apple's six month maximum
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the expiry string is invalid or zero
    pub fn client_secret_lifetime(&self) -> Result<Duration, AppleAuthError> {
        let lifetime = parse_duration(&self.client_secret_expiry)
            .map_err(|e| AppleAuthError::Configuration(format!("client_secret_expiry: {e}")))?;

        if lifetime.is_zero() {
            return Err(AppleAuthError::Configuration(
                "client_secret_expiry must be greater than zero".to_string(),
            ));
        }

        Ok(lifetime.min(MAX_CLIENT_SECRET_LIFETIME))
    }

    /// Check that all required identifiers and a key source are configured
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first missing value
    pub fn validate(&self) -> Result<(), AppleAuthError> {
        let required = [
            ("client_id", self.get_client_id()),
            ("team_id", self.get_team_id()),
            ("key_id", self.get_key_id()),
        ];

        for (name, value) in required {
            if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                return Err(AppleAuthError::Configuration(format!(
                    "{name} is required for Sign in with Apple"
                )));
            }
        }

        if self.key.is_none() && self.get_key_file_path().is_none() {
            return Err(AppleAuthError::Configuration(
                "either key or key_file_path must be configured".to_string(),
            ));
        }

        self.client_secret_lifetime()?;
        Ok(())
    }
}
