// Apple-specific utility functions
use serde::{Deserialize, Serialize};

use crate::models::ProfileName;

/// Name as sent in Apple's first-login `user` form parameter
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AppleUserName {
    #[serde(rename = "firstName")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName")]
    pub last_name: Option<String>,
}

impl AppleUserName {
    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

/// User information Apple posts alongside the code on the first authorization
///
/// The identity token remains the source of truth for `sub` and email; this
/// payload is unsigned and only used for the name and as an email fallback.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AppleUserInfo {
    #[serde(default)]
    pub name: AppleUserName,
    pub email: Option<String>,
}

impl AppleUserInfo {
    /// Convert to a profile name when at least one part is present
    #[must_use]
    pub fn profile_name(&self) -> Option<ProfileName> {
        let first = self.name.first_name.clone().unwrap_or_default();
        let last = self.name.last_name.clone().unwrap_or_default();
        if first.is_empty() && last.is_empty() {
            return None;
        }
        Some(ProfileName {
            first_name: first,
            last_name: last,
        })
    }
}

/// Parse the raw `user` form parameter
#[must_use]
pub fn parse_user_param(raw: &str) -> Option<AppleUserInfo> {
    match serde_json::from_str::<AppleUserInfo>(raw) {
        Ok(user_info) => Some(user_info),
        Err(e) => {
            log::warn!("Ignoring unparsable Apple user parameter: {e}");
            None
        }
    }
}
