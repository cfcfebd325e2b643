// Apple client secret generation
//
// Apple's token endpoint takes an ES256 JWT signed with the developer's key in
// place of a static client secret.
use chrono::Utc;
use log::{debug, info};
use p256::ecdsa::SigningKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::error::{AppleAuthError, Result};
use crate::settings::{StrategyOptions, APPLE_ISSUER};
use crate::utils::crypto::{create_es256_jwt, create_jwt_header, parse_es256_private_key};

/// Regenerate once fewer than this many seconds of validity remain
const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct CachedSecret {
    token: String,
    expires_at: i64,
}

/// Signs and caches the client secret sent to Apple's token endpoint
pub struct ClientSecretSigner {
    team_id: String,
    client_id: String,
    key_id: String,
    signing_key: SigningKey,
    lifetime: Duration,
    cached: Arc<RwLock<Option<CachedSecret>>>,
    refresh_lock: Mutex<()>,
}

impl ClientSecretSigner {
    /// Build a signer from strategy options, resolving the key material now
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an identifier is missing, the key
    /// file cannot be read, or the key is not a P-256 PKCS#8 key
    pub fn from_options(options: &StrategyOptions) -> Result<Self> {
        options.validate()?;

        let team_id = required(options.get_team_id(), "team_id")?;
        let client_id = required(options.get_client_id(), "client_id")?;
        let key_id = required(options.get_key_id(), "key_id")?;
        let key_pem = resolve_key_material(options)?;

        let signing_key = parse_es256_private_key(&key_pem)
            .map_err(|e| AppleAuthError::Configuration(e.to_string()))?;

        Ok(Self {
            team_id,
            client_id,
            key_id,
            signing_key,
            lifetime: options.client_secret_lifetime()?,
            cached: Arc::new(RwLock::new(None)),
            refresh_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Remaining validity below which a cached secret is replaced
    #[must_use]
    pub fn safety_margin(&self) -> Duration {
        DEFAULT_SAFETY_MARGIN.min(self.lifetime / 10)
    }

    /// Sign a brand new client secret, bypassing the cache
    ///
    /// # Errors
    ///
    /// Returns a configuration error if signing fails
    pub fn sign(&self) -> Result<String> {
        self.sign_at(Utc::now().timestamp()).map(|secret| secret.token)
    }

    fn sign_at(&self, now: i64) -> Result<CachedSecret> {
        let lifetime = i64::try_from(self.lifetime.as_secs()).map_err(|_| {
            AppleAuthError::Configuration("client secret lifetime out of range".to_string())
        })?;
        let expires_at = now + lifetime;

        let header = create_jwt_header(Some(&self.key_id));
        let payload = serde_json::json!({
            "iss": self.team_id,
            "iat": now,
            "exp": expires_at,
            "aud": APPLE_ISSUER,
            "sub": self.client_id
        });

        let token = create_es256_jwt(&header, &payload, &self.signing_key)
            .map_err(|e| AppleAuthError::Configuration(format!("Failed to sign client secret: {e}")))?;

        debug!("Generated Apple client secret valid until {expires_at}");
        Ok(CachedSecret { token, expires_at })
    }

    fn is_fresh(&self, secret: &CachedSecret, now: i64) -> bool {
        let margin = i64::try_from(self.safety_margin().as_secs()).unwrap_or(i64::MAX);
        secret.expires_at.saturating_sub(now) > margin
    }

    /// Return the cached client secret, regenerating it near expiry
    ///
    /// Concurrent callers that find the secret stale wait for a single
    /// regeneration instead of each signing their own.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if signing fails
    pub async fn current_secret(&self) -> Result<String> {
        if let Some(secret) = self.cached_if_fresh().await {
            return Ok(secret);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have regenerated while we waited
        if let Some(secret) = self.cached_if_fresh().await {
            return Ok(secret);
        }

        let secret = self.sign_at(Utc::now().timestamp())?;
        let token = secret.token.clone();
        *self.cached.write().await = Some(secret);
        info!("🔑 Regenerated Apple client secret");

        Ok(token)
    }

    async fn cached_if_fresh(&self) -> Option<String> {
        let cached = self.cached.read().await;
        let now = Utc::now().timestamp();
        cached
            .as_ref()
            .filter(|secret| self.is_fresh(secret, now))
            .map(|secret| secret.token.clone())
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppleAuthError::Configuration(format!("{name} is not configured")))
}

/// Inline key first, then the key file
fn resolve_key_material(options: &StrategyOptions) -> Result<String> {
    if let Some(key) = options.key.as_ref().filter(|k| !k.trim().is_empty()) {
        return Ok(key.clone());
    }

    let path = options.get_key_file_path().ok_or_else(|| {
        AppleAuthError::Configuration("no signing key or key file configured".to_string())
    })?;

    std::fs::read_to_string(&path).map_err(|e| {
        AppleAuthError::Configuration(format!("Failed to read Apple private key file {path}: {e}"))
    })
}
