#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the apple-auth-strategy crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod models;
pub mod oauth;
pub mod settings;
pub mod strategy;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use error::{AppleAuthError, TokenVerificationError};
pub use models::{AuthOutcome, AuthRequest, AuthenticateOptions, AuthorizationRequest, Profile, ProfileName, TokenSet};
pub use oauth::ProviderError;
pub use settings::{AppleAuthSettings, StrategyOptions};
pub use strategy::{AppleStrategy, Strategy, VerifyCallback};
