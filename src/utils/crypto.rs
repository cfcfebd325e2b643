// Cryptographic utilities for generating opaque values and signing JWTs

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use p256::ecdsa::SigningKey;
use rand::RngCore;
use serde::de::DeserializeOwned;

/// Bytes of entropy in an authorization `state` value
pub const STATE_SIZE: usize = 24;

/// Bytes of entropy in an authentication nonce
pub const NONCE_SIZE: usize = 32;

/// Generate a cryptographically secure `state` value
///
/// 24 bytes (192 bits) of entropy, base64url encoded to 32 characters.
#[must_use]
pub fn generate_state() -> String {
    generate_nonce(STATE_SIZE)
}

/// Generate a cryptographically secure nonce of specified byte length
///
/// # Arguments
///
/// * `length` - Number of bytes to generate (recommended: 16-32 for most use cases)
///
/// # Returns
///
/// A base64url-encoded string representing the specified bytes of random data
#[must_use]
pub fn generate_nonce(length: usize) -> String {
    let mut nonce = vec![0u8; length];
    rand::rng().fill_bytes(&mut nonce);
    general_purpose::URL_SAFE_NO_PAD.encode(nonce)
}

/// Split a compact JWT into its three segments
///
/// # Errors
///
/// Returns an error if the token does not have exactly three non-empty segments
pub fn split_jwt(token: &str) -> Result<[&str; 3]> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() && !signature.is_empty() =>
        {
            Ok([header, payload, signature])
        }
        _ => Err(anyhow!("Invalid JWT format")),
    }
}

/// Decode a base64url JWT segment into a deserializable value
///
/// # Errors
///
/// Returns an error if base64 decoding or JSON parsing fails
pub fn decode_jwt_part<T: DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .context("Base64 decode failed")?;
    serde_json::from_slice(&bytes).context("JSON parse failed")
}

/// Helper function to decode JWT token payload without verification
///
/// Used to inspect claims of tokens this crate produced itself.
///
/// # Errors
///
/// Returns an error if the JWT format, base64 or JSON is invalid
pub fn decode_jwt_payload(token: &str) -> Result<serde_json::Value> {
    let [_, payload, _] = split_jwt(token)?;
    decode_jwt_part(payload)
}

/// Parse a PEM-encoded PKCS#8 ECDSA P-256 private key
///
/// # Errors
///
/// Returns an error if the PEM is not a valid P-256 PKCS#8 key
pub fn parse_es256_private_key(private_key_pem: &str) -> Result<SigningKey> {
    use p256::pkcs8::DecodePrivateKey;

    SigningKey::from_pkcs8_pem(private_key_pem.trim())
        .map_err(|e| anyhow!("Failed to parse ECDSA private key: {e:?}"))
}

/// Helper function to create an ES256 JWT header
#[must_use]
pub fn create_jwt_header(key_id: Option<&str>) -> serde_json::Value {
    let mut header = serde_json::json!({
        "alg": "ES256",
        "typ": "JWT"
    });

    if let Some(kid) = key_id {
        header["kid"] = serde_json::Value::String(kid.to_string());
    }

    header
}

/// Create a compact ES256 JWT (`header.payload.signature`)
///
/// # Errors
///
/// Returns an error if the header or payload cannot be serialized
pub fn create_es256_jwt(
    header: &serde_json::Value,
    payload: &serde_json::Value,
    signing_key: &SigningKey,
) -> Result<String> {
    use p256::ecdsa::{signature::Signer, Signature};

    let header_json = serde_json::to_string(header).context("Failed to serialize JWT header")?;
    let payload_json =
        serde_json::to_string(payload).context("Failed to serialize JWT payload")?;

    let header_b64 = general_purpose::URL_SAFE_NO_PAD.encode(header_json.as_bytes());
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload_json.as_bytes());

    let message = format!("{header_b64}.{payload_b64}");

    // JWS uses the raw 64 byte r||s form, not DER
    let signature: Signature = signing_key.sign(message.as_bytes());
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature.to_bytes());

    Ok(format!("{message}.{signature_b64}"))
}
