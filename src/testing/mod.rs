//! Testing utilities for the Apple strategy
//!
//! Fixture keys and helpers that mint identity tokens and JWKS documents, so
//! tests can stand in for Apple's endpoints without network access.
//!
//! ```rust,ignore
//! use apple_auth_strategy::testing::TestFixtures;
//!
//! let claims = TestFixtures::id_token_claims(Some("nonce"));
//! let id_token = TestFixtures::sign_id_token(&claims);
//! ```

pub mod fixtures;

pub use fixtures::TestFixtures;

/// Common test constants
pub mod constants {
    /// Services ID used as OAuth client id
    pub const TEST_CLIENT_ID: &str = "com.example.web";

    /// Apple developer team id
    pub const TEST_TEAM_ID: &str = "TEST123456";

    /// Key id of the developer's Sign in with Apple key
    pub const TEST_KEY_ID: &str = "TEST789XYZ";

    /// Key id under which the fixture JWKS publishes its key
    pub const TEST_JWKS_KID: &str = "apple-test-kid";

    /// Stable Apple user identifier
    pub const TEST_SUBJECT: &str = "001234.abcdef0123456789.1234";

    /// Default test email address
    pub const TEST_EMAIL: &str = "jane@privaterelay.appleid.com";
}
