// Provider error body parsing
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind reported when the provider body is not the documented JSON shape
pub const UNKNOWN_ERROR_KIND: &str = "unknown_error";

/// Structured form of an OAuth2 error body `{error, error_description}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub kind: String,
    pub description: Option<String>,
    pub raw: String,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{} ({description})", self.kind),
            None if self.kind == UNKNOWN_ERROR_KIND => write!(f, "{}: {}", self.kind, self.raw),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Parse a provider error body into a [`ProviderError`]
///
/// Never fails: anything other than a JSON object with a string `error`
/// field becomes an [`UNKNOWN_ERROR_KIND`] error wrapping the raw text.
#[must_use]
pub fn parse_error_response(body: &str) -> ProviderError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.error.is_empty() => ProviderError {
            kind: parsed.error,
            description: parsed.error_description,
            raw: body.to_string(),
        },
        Ok(_) | Err(_) => {
            debug!("Provider error body is not a recognised OAuth error object");
            ProviderError {
                kind: UNKNOWN_ERROR_KIND.to_string(),
                description: None,
                raw: body.to_string(),
            }
        }
    }
}

/// Build a [`ProviderError`] from the `error` parameter of a callback redirect
#[must_use]
pub fn from_callback_error(error: &str, description: Option<&str>) -> ProviderError {
    ProviderError {
        kind: error.to_string(),
        description: description.map(ToString::to_string),
        raw: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invalid_grant() {
        let error = parse_error_response(r#"{"error":"invalid_grant"}"#);
        assert_eq!(error.kind, "invalid_grant");
        assert_eq!(error.description, None);
        assert_eq!(error.to_string(), "invalid_grant");
    }

    #[test]
    fn test_parse_keeps_description() {
        let body = r#"{"error":"invalid_client","error_description":"client secret expired"}"#;
        let error = parse_error_response(body);
        assert_eq!(error.kind, "invalid_client");
        assert_eq!(error.description.as_deref(), Some("client secret expired"));
        assert_eq!(error.raw, body);
    }

    #[test]
    fn test_malformed_bodies_fall_back_to_unknown() {
        let bodies = [
            "",
            "<html>Bad Gateway</html>",
            "{",
            "[]",
            "null",
            r#"{"error":42}"#,
            r#"{"error":""}"#,
            r#"{"message":"nope"}"#,
        ];

        for body in bodies {
            let error = parse_error_response(body);
            assert_eq!(error.kind, UNKNOWN_ERROR_KIND, "body: {body}");
            assert_eq!(error.raw, body);
        }
    }

    #[test]
    fn test_callback_error() {
        let error = from_callback_error("user_cancelled_authorize", None);
        assert_eq!(error.kind, "user_cancelled_authorize");
    }
}
