//! Error taxonomy for the Sign in with Apple strategy
//!
//! Every failure in the flow is classified into one of these variants and
//! surfaced to the embedding framework; nothing is swallowed or retried here.

use std::fmt;

use crate::oauth::error_response::ProviderError;

/// Identity token verification failures, reported distinctly so callers can
/// choose between prompting a new login and failing hard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerificationError {
    BadSignature,
    Expired,
    AudienceMismatch { expected: String, actual: Vec<String> },
    NonceInvalid(String),
    IssuerMismatch { expected: String, actual: String },
    IssuedInFuture,
    UnknownKey(String),
    UnsupportedAlgorithm(String),
    Malformed(String),
}

impl TokenVerificationError {
    /// Stable discriminator for logging and host-side branching
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::AudienceMismatch { .. } => "audience_mismatch",
            Self::NonceInvalid(_) => "nonce_invalid",
            Self::IssuerMismatch { .. } => "issuer_mismatch",
            Self::IssuedInFuture => "issued_in_future",
            Self::UnknownKey(_) => "unknown_key",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::Malformed(_) => "malformed",
        }
    }
}

impl fmt::Display for TokenVerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => write!(f, "identity token signature verification failed"),
            Self::Expired => write!(f, "identity token has expired"),
            Self::AudienceMismatch { expected, actual } => {
                write!(f, "identity token audience {actual:?} does not contain '{expected}'")
            }
            Self::NonceInvalid(msg) => write!(f, "identity token nonce is invalid: {msg}"),
            Self::IssuerMismatch { expected, actual } => {
                write!(f, "identity token issuer '{actual}' does not match '{expected}'")
            }
            Self::IssuedInFuture => write!(f, "identity token was issued in the future"),
            Self::UnknownKey(kid) => write!(f, "no provider signing key with id '{kid}'"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported signing algorithm: {alg}"),
            Self::Malformed(msg) => write!(f, "malformed identity token: {msg}"),
        }
    }
}

impl std::error::Error for TokenVerificationError {}

#[derive(Debug, Clone)]
pub enum AppleAuthError {
    /// Bad or missing configuration, including unresolvable signing material
    Configuration(String),
    /// A network call exceeded its timeout
    NetworkTimeout(String),
    /// Transport failure that is not a timeout
    Network(String),
    /// The token endpoint rejected the code or client secret
    TokenExchange { status: u16, error: ProviderError },
    TokenVerification(TokenVerificationError),
    NonceMismatch(String),
    NonceReplay,
    /// The provider answered with a body that could not be parsed
    MalformedResponse(String),
    StateMismatch,
    /// Error carried on the callback redirect (e.g. the user cancelled)
    Provider(ProviderError),
    /// The application's verify callback refused the profile
    Verify(String),
}

impl AppleAuthError {
    /// Stable discriminator for logging and host-side branching
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::NetworkTimeout(_) => "network_timeout",
            Self::Network(_) => "network_error",
            Self::TokenExchange { error, .. } => &error.kind,
            Self::TokenVerification(e) => e.kind(),
            Self::NonceMismatch(_) => "nonce_mismatch",
            Self::NonceReplay => "nonce_replay",
            Self::MalformedResponse(_) => "malformed_response",
            Self::StateMismatch => "state_mismatch",
            Self::Provider(error) => &error.kind,
            Self::Verify(_) => "verify_failed",
        }
    }
}

impl fmt::Display for AppleAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            Self::NetworkTimeout(msg) => write!(f, "Network timeout: {msg}"),
            Self::Network(msg) => write!(f, "Network error: {msg}"),
            Self::TokenExchange { status, error } => {
                write!(f, "Token exchange failed with status {status}: {error}")
            }
            Self::TokenVerification(e) => write!(f, "Token verification failed: {e}"),
            Self::NonceMismatch(msg) => write!(f, "Nonce mismatch: {msg}"),
            Self::NonceReplay => write!(f, "Nonce has already been used"),
            Self::MalformedResponse(msg) => write!(f, "Malformed provider response: {msg}"),
            Self::StateMismatch => write!(f, "Callback state does not match the issued state"),
            Self::Provider(error) => write!(f, "Provider error: {error}"),
            Self::Verify(msg) => write!(f, "Verify callback failed: {msg}"),
        }
    }
}

impl std::error::Error for AppleAuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TokenVerification(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TokenVerificationError> for AppleAuthError {
    fn from(err: TokenVerificationError) -> Self {
        Self::TokenVerification(err)
    }
}

pub type Result<T, E = AppleAuthError> = std::result::Result<T, E>;
