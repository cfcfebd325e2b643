use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Provider name reported on every profile
pub const PROVIDER_NAME: &str = "apple";

/// User name Apple shares on the first authorization only
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProfileName {
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
}

impl ProfileName {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Normalized identity produced after a verified token exchange
///
/// Fields are read-only once built; the profile is handed to the verify
/// callback by value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub(crate) id: String,
    pub(crate) provider: String,
    pub(crate) email: Option<String>,
    pub(crate) email_verified: bool,
    pub(crate) is_private_email: bool,
    pub(crate) name: Option<ProfileName>,
}

impl Profile {
    /// Stable Apple user identifier (`sub` claim)
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn email_verified(&self) -> bool {
        self.email_verified
    }

    /// Whether the email is an Apple private relay address
    #[must_use]
    pub fn is_private_email(&self) -> bool {
        self.is_private_email
    }

    #[must_use]
    pub fn name(&self) -> Option<&ProfileName> {
        self.name.as_ref()
    }
}

/// Tokens returned by the token endpoint
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absent on refresh responses
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Per-request overrides, built fresh for each authentication attempt
#[derive(Debug, Clone, Default)]
pub struct AuthenticateOptions {
    pub callback_url: Option<String>,
    pub scope: Option<Vec<String>>,
    pub state: Option<String>,
    pub nonce: Option<String>,
}

/// Framework-neutral view of an incoming authentication request
///
/// `params` holds the merged query string and form body. The saved values
/// are what the host stored in its own session when it issued the redirect.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    params: HashMap<String, String>,
    saved_state: Option<String>,
    saved_nonce: Option<String>,
}

impl AuthRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a request from query or form parameters
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_saved_state(mut self, state: impl Into<String>) -> Self {
        self.saved_state = Some(state.into());
        self
    }

    #[must_use]
    pub fn with_saved_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.saved_nonce = Some(nonce.into());
        self
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn saved_state(&self) -> Option<&str> {
        self.saved_state.as_deref()
    }

    #[must_use]
    pub fn saved_nonce(&self) -> Option<&str> {
        self.saved_nonce.as_deref()
    }
}

/// Redirect target plus the values the host must keep for the callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
}

/// Result of a call to `authenticate`
#[derive(Debug)]
pub enum AuthOutcome<U> {
    /// Send the user agent to Apple's authorization endpoint
    Redirect(AuthorizationRequest),
    /// The callback completed and the verify callback accepted the profile
    Success(U),
}
