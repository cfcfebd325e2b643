//! Identity token claim extraction
//!
//! Maps validated Apple identity token claims, plus the optional first-login
//! `user` parameter, onto a [`Profile`].

use crate::error::{Result, TokenVerificationError};
use crate::models::{Profile, PROVIDER_NAME};
use crate::oauth::jwt_validation::IdTokenClaims;
use crate::utils::apple::AppleUserInfo;
use log::debug;
use serde_json::Value;

/// Identity token processor turning claims into profiles
pub struct IdTokenProcessor;

impl IdTokenProcessor {
    /// Build a profile from validated claims
    ///
    /// The token's email wins over the one in `apple_user_info`, which is
    /// unsigned and only consulted when the token carries no email.
    ///
    /// # Errors
    ///
    /// Returns a malformed-token error if the subject claim is missing
    pub fn build_profile(
        claims: &IdTokenClaims,
        apple_user_info: Option<&AppleUserInfo>,
    ) -> Result<Profile> {
        let id = Self::extract_subject(claims)?;

        let email = claims.email.clone().or_else(|| {
            let fallback = apple_user_info.and_then(|info| info.email.clone());
            if fallback.is_some() {
                debug!("Using Apple user info email as fallback");
            }
            fallback
        });

        Ok(Profile {
            id,
            provider: PROVIDER_NAME.to_string(),
            email,
            email_verified: Self::claim_as_bool(claims.email_verified.as_ref()).unwrap_or(false),
            is_private_email: Self::claim_as_bool(claims.is_private_email.as_ref())
                .unwrap_or(false),
            name: apple_user_info.and_then(AppleUserInfo::profile_name),
        })
    }

    /// Whether the token lets the nonce be checked
    ///
    /// Apple sets `nonce_supported: false` for platforms that cannot carry a
    /// nonce; an absent claim counts as supported.
    #[must_use]
    pub fn nonce_supported(claims: &IdTokenClaims) -> bool {
        Self::claim_as_bool(claims.nonce_supported.as_ref()).unwrap_or(true)
    }

    /// Extract the subject (sub) claim
    fn extract_subject(claims: &IdTokenClaims) -> Result<String> {
        claims
            .sub
            .clone()
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| {
                TokenVerificationError::Malformed("Missing or invalid 'sub' claim".to_string())
                    .into()
            })
    }

    /// Apple sends booleans either natively or as `"true"` / `"false"`
    #[must_use]
    pub fn claim_as_bool(value: Option<&Value>) -> Option<bool> {
        match value? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}
