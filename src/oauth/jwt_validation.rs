// Identity token validation against Apple's published signing keys
// Signature verification (RS256, ES256), JWKS caching and claims validation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

// Cryptographic imports
use p256::{
    ecdsa::{Signature as EcdsaSignature, VerifyingKey as EcdsaVerifyingKey},
    EncodedPoint,
};
use rsa::{pkcs1v15::VerifyingKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{AppleAuthError, Result, TokenVerificationError};
use crate::oauth::fetch_jwks;
use crate::settings::JwtValidationConfig;
use crate::utils::crypto::{decode_jwt_part, split_jwt};
use crate::utils::logging::LoggingHelper;

// ============================================================================
// JWT Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub kid: Option<String>,
}

/// Claims of an Apple identity token
///
/// Apple encodes several booleans either as JSON booleans or as the strings
/// `"true"`/`"false"`, so those stay as raw values here.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdTokenClaims {
    pub iss: Option<String>,
    pub aud: Option<serde_json::Value>, // string or array
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub sub: Option<String>,
    pub nonce: Option<String>,
    pub nonce_supported: Option<serde_json::Value>,
    pub email: Option<String>,
    pub email_verified: Option<serde_json::Value>,
    pub is_private_email: Option<serde_json::Value>,
    pub auth_time: Option<i64>,
}

// ============================================================================
// JWKS Structures
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKey {
    pub kty: String,         // Key type (RSA, EC)
    pub kid: Option<String>, // Key ID
    pub alg: Option<String>, // Algorithm (RS256, ES256)
    #[serde(rename = "use")]
    pub key_use: Option<String>, // "sig" for signing

    // RSA keys
    pub n: Option<String>, // Modulus
    pub e: Option<String>, // Exponent

    // EC keys
    pub crv: Option<String>, // Curve
    pub x: Option<String>,   // X coordinate
    pub y: Option<String>,   // Y coordinate
}

// ============================================================================
// JWKS Cache
// ============================================================================

pub struct JwksCache {
    // Key ID -> JsonWebKey
    keys: HashMap<String, JsonWebKey>,

    expires_at: Option<DateTime<Utc>>,

    // Bumped on every refresh attempt so waiters can tell one happened
    generation: u64,

    // Outcome of the latest attempt when it failed
    last_error: Option<AppleAuthError>,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            expires_at: None,
            generation: 0,
            last_error: None,
        }
    }

    /// Check if cached keys are still valid
    #[must_use]
    pub fn is_cache_valid(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| Utc::now() < expires_at)
    }

    #[must_use]
    pub fn get_key(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.get(kid)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Error of the latest refresh attempt, if it failed
    #[must_use]
    pub fn last_error(&self) -> Option<&AppleAuthError> {
        self.last_error.as_ref()
    }

    /// Record a failed refresh; previously cached keys are left untouched
    pub fn record_failure(&mut self, error: AppleAuthError) {
        self.last_error = Some(error);
        self.generation += 1;
    }

    /// Replace the cached keys; they stay valid for `ttl`
    pub fn store_keys(&mut self, keys: Vec<JsonWebKey>, ttl: Duration) {
        let mut cached_keys = HashMap::new();

        for key in keys {
            if key.key_use.as_deref().is_some_and(|key_use| key_use != "sig") {
                debug!("Skipping JWKS entry {:?} not meant for signatures", key.kid);
                continue;
            }
            if let Some(kid) = &key.kid {
                cached_keys.insert(kid.clone(), key);
            } else {
                debug!("Skipping JWKS entry without kid");
            }
        }

        debug!("💾 Cached {} Apple signing keys for {ttl:?}", cached_keys.len());
        self.keys = cached_keys;
        self.expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        self.last_error = None;
        self.generation += 1;
    }
}

// ============================================================================
// JWT Validator
// ============================================================================

pub struct JwtValidator {
    cache: Arc<RwLock<JwksCache>>,
    refresh_lock: Arc<Mutex<()>>,
    http_client: reqwest::Client,
    jwks_uri: String,
    expected_issuer: String,
    clock_skew_seconds: i64,
    fallback_cache_duration: Duration,
}

impl Clone for JwtValidator {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            refresh_lock: Arc::clone(&self.refresh_lock),
            http_client: self.http_client.clone(),
            jwks_uri: self.jwks_uri.clone(),
            expected_issuer: self.expected_issuer.clone(),
            clock_skew_seconds: self.clock_skew_seconds,
            fallback_cache_duration: self.fallback_cache_duration,
        }
    }
}

impl JwtValidator {
    #[must_use]
    pub fn new(http_client: reqwest::Client, jwks_uri: &str, config: &JwtValidationConfig) -> Self {
        Self {
            cache: Arc::new(RwLock::new(JwksCache::new())),
            refresh_lock: Arc::new(Mutex::new(())),
            http_client,
            jwks_uri: jwks_uri.to_string(),
            expected_issuer: config.expected_issuer.clone(),
            clock_skew_seconds: i64::try_from(config.clock_skew_seconds).unwrap_or(300),
            fallback_cache_duration: Duration::from_secs(config.cache_duration_seconds),
        }
    }

    /// Fetch JWKS from the configured URI and cache the keys
    ///
    /// # Errors
    /// Returns a network or malformed-response error if the JWKS cannot be
    /// fetched or parsed
    pub async fn fetch_and_cache_jwks(&self) -> Result<()> {
        debug!("🔑 Fetching Apple JWKS from {}", self.jwks_uri);

        let fetched = self.fetch_key_set().await;
        let mut cache = self.cache.write().await;
        match fetched {
            Ok((jwks, ttl)) => {
                cache.store_keys(jwks.keys, ttl);
                Ok(())
            }
            Err(e) => {
                warn!("Apple JWKS refresh failed: {e}");
                cache.record_failure(e.clone());
                Err(e)
            }
        }
    }

    async fn fetch_key_set(&self) -> Result<(JsonWebKeySet, Duration)> {
        let (jwks_value, max_age) = fetch_jwks(&self.http_client, &self.jwks_uri).await?;

        let jwks: JsonWebKeySet = serde_json::from_value(jwks_value).map_err(|e| {
            AppleAuthError::MalformedResponse(format!("Failed to parse JWKS: {e}"))
        })?;

        LoggingHelper::log_jwks_refreshed(jwks.keys.len(), max_age);
        let ttl = max_age.map_or(self.fallback_cache_duration, Duration::from_secs);
        Ok((jwks, ttl))
    }

    /// Get a public key for token verification
    ///
    /// A cache miss or expired cache triggers one refresh. Concurrent
    /// callers queue behind the refresh lock and reuse its outcome, failed
    /// or not.
    ///
    /// # Errors
    /// Returns `UnknownKey` if the key is absent after a refresh, or the
    /// fetch error if the JWKS cannot be retrieved
    pub async fn get_public_key(&self, kid: &str) -> Result<JsonWebKey> {
        let seen_generation = {
            let cache = self.cache.read().await;
            if cache.is_cache_valid() {
                if let Some(key) = cache.get_key(kid) {
                    debug!("🎯 Found cached key '{kid}'");
                    return Ok(key.clone());
                }
            }
            cache.generation()
        };

        // Cache miss or expired - need to refresh
        let _guard = self.refresh_lock.lock().await;

        let refreshed_meanwhile = self.cache.read().await.generation() != seen_generation;
        if refreshed_meanwhile {
            debug!("JWKS refreshed by a concurrent caller, skipping fetch");
        } else {
            self.fetch_and_cache_jwks().await?;
        }

        let cache = self.cache.read().await;
        if let Some(error) = cache.last_error() {
            return Err(error.clone());
        }
        cache
            .get_key(kid)
            .cloned()
            .ok_or_else(|| TokenVerificationError::UnknownKey(kid.to_string()).into())
    }

    /// Validate an identity token's signature and standard claims
    ///
    /// Nonce checks are left to the caller, which knows the login attempt.
    ///
    /// # Errors
    /// Returns a `TokenVerification` error naming the failed check, or a
    /// network error if the signing keys cannot be fetched
    pub async fn validate_id_token(&self, token: &str, client_id: &str) -> Result<IdTokenClaims> {
        debug!("🔒 Starting identity token validation");

        // Parse JWT structure
        let [header_b64, claims_b64, _] =
            split_jwt(token).map_err(|e| TokenVerificationError::Malformed(e.to_string()))?;

        let header = Self::decode_jwt_header(header_b64)?;
        debug!("📋 JWT header: alg={}, kid={:?}", header.alg, header.kid);

        // Verify algorithm is supported
        match header.alg.as_str() {
            "RS256" | "ES256" => {}
            alg => return Err(TokenVerificationError::UnsupportedAlgorithm(alg.to_string()).into()),
        }

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| TokenVerificationError::Malformed("missing kid header".to_string()))?;

        let public_key = self.get_public_key(kid).await?;

        Self::verify_signature(token, &header.alg, &public_key)?;
        debug!("✅ JWT signature verified successfully");

        let claims = Self::decode_jwt_claims(claims_b64)?;
        self.validate_claims(&claims, client_id, Utc::now().timestamp())?;
        debug!("✅ JWT claims validated successfully");

        info!("🎉 Identity token validated for subject {:?}", claims.sub);
        Ok(claims)
    }

    fn decode_jwt_header(header_b64: &str) -> Result<JwtHeader, TokenVerificationError> {
        decode_jwt_part(header_b64)
            .map_err(|e| TokenVerificationError::Malformed(format!("Invalid header: {e}")))
    }

    fn decode_jwt_claims(claims_b64: &str) -> Result<IdTokenClaims, TokenVerificationError> {
        decode_jwt_part(claims_b64)
            .map_err(|e| TokenVerificationError::Malformed(format!("Invalid claims: {e}")))
    }

    /// Verify JWT signature cryptographically
    fn verify_signature(
        token: &str,
        algorithm: &str,
        public_key: &JsonWebKey,
    ) -> Result<(), TokenVerificationError> {
        let [header_b64, claims_b64, signature_b64] =
            split_jwt(token).map_err(|e| TokenVerificationError::Malformed(e.to_string()))?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        // A key pinned to one algorithm must not verify tokens claiming another
        if let Some(key_alg) = public_key.alg.as_deref() {
            if key_alg != algorithm {
                return Err(TokenVerificationError::UnsupportedAlgorithm(format!(
                    "{algorithm} with key for {key_alg}"
                )));
            }
        }

        let signature_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| {
                TokenVerificationError::Malformed(format!("Invalid signature encoding: {e}"))
            })?;

        match (algorithm, public_key.kty.as_str()) {
            ("RS256", "RSA") => Self::verify_rsa_signature(&signing_input, &signature_bytes, public_key),
            ("ES256", "EC") => Self::verify_ecdsa_signature(&signing_input, &signature_bytes, public_key),
            (alg, kty) => Err(TokenVerificationError::UnsupportedAlgorithm(format!(
                "{alg} with {kty} key"
            ))),
        }
    }

    fn decode_key_component(value: Option<&String>, name: &str) -> Result<Vec<u8>, TokenVerificationError> {
        let value = value.ok_or_else(|| {
            TokenVerificationError::Malformed(format!("signing key is missing '{name}'"))
        })?;
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|e| TokenVerificationError::Malformed(format!("Invalid key component '{name}': {e}")))
    }

    /// Verify RSA PKCS#1 v1.5 signature with SHA-256
    fn verify_rsa_signature(
        signing_input: &str,
        signature: &[u8],
        public_key: &JsonWebKey,
    ) -> Result<(), TokenVerificationError> {
        use rsa::signature::Verifier;

        let n_bytes = Self::decode_key_component(public_key.n.as_ref(), "n")?;
        let e_bytes = Self::decode_key_component(public_key.e.as_ref(), "e")?;

        let rsa_key = RsaPublicKey::new(
            rsa::BigUint::from_bytes_be(&n_bytes),
            rsa::BigUint::from_bytes_be(&e_bytes),
        )
        .map_err(|e| TokenVerificationError::Malformed(format!("Invalid RSA key: {e}")))?;

        let signature = rsa::pkcs1v15::Signature::try_from(signature)
            .map_err(|_| TokenVerificationError::BadSignature)?;

        VerifyingKey::<Sha256>::new(rsa_key)
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| TokenVerificationError::BadSignature)
    }

    /// Verify ECDSA P-256 signature in JWS `r || s` form
    fn verify_ecdsa_signature(
        signing_input: &str,
        signature: &[u8],
        public_key: &JsonWebKey,
    ) -> Result<(), TokenVerificationError> {
        use p256::ecdsa::signature::Verifier;

        let x_bytes = Self::decode_key_component(public_key.x.as_ref(), "x")?;
        let y_bytes = Self::decode_key_component(public_key.y.as_ref(), "y")?;

        // Uncompressed point: 0x04 || x || y
        let mut point_bytes = vec![0x04];
        point_bytes.extend_from_slice(&x_bytes);
        point_bytes.extend_from_slice(&y_bytes);

        let encoded_point = EncodedPoint::from_bytes(&point_bytes)
            .map_err(|e| TokenVerificationError::Malformed(format!("Invalid EC point: {e}")))?;
        let verifying_key = EcdsaVerifyingKey::from_encoded_point(&encoded_point)
            .map_err(|e| TokenVerificationError::Malformed(format!("Invalid ECDSA key: {e}")))?;

        let signature =
            EcdsaSignature::from_slice(signature).map_err(|_| TokenVerificationError::BadSignature)?;

        verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| TokenVerificationError::BadSignature)
    }

    /// Validate issuer, audience, expiry and issued-at
    ///
    /// Expiry gets no leeway; the clock skew only tolerates an `iat` that is
    /// slightly ahead of the local clock.
    fn validate_claims(
        &self,
        claims: &IdTokenClaims,
        client_id: &str,
        now: i64,
    ) -> Result<(), TokenVerificationError> {
        let issuer = claims.iss.as_deref().unwrap_or_default();
        if issuer != self.expected_issuer {
            warn!("Rejected identity token from issuer '{issuer}'");
            return Err(TokenVerificationError::IssuerMismatch {
                expected: self.expected_issuer.clone(),
                actual: issuer.to_string(),
            });
        }

        let audiences = extract_audiences(claims.aud.as_ref());
        if !audiences.iter().any(|aud| aud == client_id) {
            warn!("Rejected identity token for audience {audiences:?}");
            return Err(TokenVerificationError::AudienceMismatch {
                expected: client_id.to_string(),
                actual: audiences,
            });
        }

        let exp = claims
            .exp
            .ok_or_else(|| TokenVerificationError::Malformed("missing exp claim".to_string()))?;
        if now >= exp {
            return Err(TokenVerificationError::Expired);
        }

        if let Some(iat) = claims.iat {
            if iat > now + self.clock_skew_seconds {
                return Err(TokenVerificationError::IssuedInFuture);
            }
        }

        if claims.sub.as_deref().is_none_or(str::is_empty) {
            return Err(TokenVerificationError::Malformed("missing sub claim".to_string()));
        }

        Ok(())
    }
}

/// Extract audience values from a string or array `aud` claim
fn extract_audiences(aud: Option<&serde_json::Value>) -> Vec<String> {
    match aud {
        Some(serde_json::Value::String(aud)) => vec![aud.clone()],
        Some(serde_json::Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(ToString::to_string))
            .collect(),
        _ => vec![],
    }
}
