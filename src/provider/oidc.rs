//! Upstream ID-token verification.
//!
//! Each OIDC-configured provider owns an [`IdTokenVerifier`] holding its own
//! key cache: JWKS documents are fetched from the configured URL, every
//! usable key is converted to a [`DecodingKey`] up front, and entries are
//! indexed by `kid` with a per-key revalidation deadline. A token naming an
//! unknown `kid` triggers one refresh, but refreshes are rate limited, so a
//! caller cycling bogus `kid`s cannot turn the verifier into a JWKS flood.
//!
//! The `iss` check can be disabled per provider for known non-compliant
//! issuers (Microsoft multitenant); every relaxed verification is logged.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    jwk::{AlgorithmParameters, Jwk, JwkSet},
};
use serde::Deserialize;
use tracing::{debug, warn};

use super::ProviderError;

/// How long a converted key stays valid before the next fetch revalidates it.
const KEY_LIFETIME: Duration = Duration::from_secs(3600);

/// Minimum spacing between JWKS fetches for one provider.
const REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// Claims checked on upstream ID tokens beyond what `jsonwebtoken` enforces.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    iss: String,
    #[allow(dead_code)]
    sub: String,
}

/// A verification key ready for use, plus its revalidation deadline.
struct CachedKey {
    key: DecodingKey,
    valid_until: Instant,
}

/// Verifies upstream ID tokens against a configured issuer and JWKS URL.
pub struct IdTokenVerifier {
    issuer: String,
    jwks_url: String,
    client_id: String,
    skip_issuer_check: bool,
    /// `kid` → converted key. One verifier serves one JWKS URL, so no
    /// URL component is needed in the index.
    keys: DashMap<String, CachedKey>,
    /// When the JWKS was last fetched; gates the refresh cooldown.
    last_fetch: Mutex<Option<Instant>>,
}

impl IdTokenVerifier {
    /// Create a verifier for one provider.
    #[must_use]
    pub fn new(
        issuer: String,
        jwks_url: String,
        client_id: String,
        skip_issuer_check: bool,
    ) -> Self {
        Self {
            issuer,
            jwks_url,
            client_id,
            skip_issuer_check,
            keys: DashMap::new(),
            last_fetch: Mutex::new(None),
        }
    }

    /// Verify signature, `exp`, `aud` (= client id), and `iss`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::IdTokenInvalid`] on verification failure and
    /// [`ProviderError::Unavailable`] when the JWKS cannot be fetched.
    pub async fn verify(
        &self,
        http: &reqwest::Client,
        id_token: &str,
    ) -> Result<(), ProviderError> {
        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|e| ProviderError::IdTokenInvalid(format!("header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| ProviderError::IdTokenInvalid("missing kid".to_string()))?;

        let decoding_key = self.key_for(http, &kid).await?;

        let alg = match header.alg {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 | Algorithm::ES256
            | Algorithm::ES384 => header.alg,
            other => {
                return Err(ProviderError::IdTokenInvalid(format!(
                    "unsupported algorithm {other:?}"
                )));
            }
        };

        let mut validation = Validation::new(alg);
        validation.leeway = 60;
        validation.set_audience(&[&self.client_id]);
        if self.skip_issuer_check {
            // Microsoft multitenant mints per-tenant issuer strings that never
            // match the configured endpoint; this is the only permitted
            // relaxation and it is always visible in the logs.
            warn!(issuer = %self.issuer, "Skipping iss validation for this provider");
        } else {
            validation.set_issuer(&[&self.issuer]);
        }

        let token = jsonwebtoken::decode::<IdTokenClaims>(id_token, &decoding_key, &validation)
            .map_err(|e| ProviderError::IdTokenInvalid(e.to_string()))?;

        debug!(issuer = %token.claims.iss, "Verified upstream ID token");
        Ok(())
    }

    /// Resolve `kid` from the cache, refreshing once when it is absent or
    /// past its deadline.
    async fn key_for(&self, http: &reqwest::Client, kid: &str) -> Result<DecodingKey, ProviderError> {
        if let Some(live) = self.live_key(kid) {
            return Ok(live);
        }

        self.refresh(http).await?;

        self.live_key(kid)
            .ok_or_else(|| ProviderError::IdTokenInvalid(format!("unknown kid {kid}")))
    }

    fn live_key(&self, kid: &str) -> Option<DecodingKey> {
        let entry = self.keys.get(kid)?;
        (Instant::now() < entry.valid_until).then(|| entry.key.clone())
    }

    /// Fetch the JWKS and rebuild the key index, unless a fetch already ran
    /// inside the cooldown window.
    async fn refresh(&self, http: &reqwest::Client) -> Result<(), ProviderError> {
        let now = Instant::now();
        {
            let mut last = self
                .last_fetch
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if matches!(*last, Some(at) if now.duration_since(at) < REFRESH_COOLDOWN) {
                return Ok(());
            }
            // Claim the slot before the await so concurrent verifications do
            // not stampede the endpoint
            *last = Some(now);
        }

        debug!(url = %self.jwks_url, "Refreshing JWKS key index");
        let document: JwkSet = http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("jwks fetch: {e}")))?
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("jwks body: {e}")))?;

        let valid_until = now + KEY_LIFETIME;
        let mut usable = 0usize;
        for jwk in &document.keys {
            let Some((kid, key)) = index_entry(jwk) else {
                continue;
            };
            self.keys.insert(kid, CachedKey { key, valid_until });
            usable += 1;
        }
        debug!(url = %self.jwks_url, usable, total = document.keys.len(), "JWKS key index rebuilt");

        Ok(())
    }
}

/// Convert one JWKS member into a `(kid, DecodingKey)` index entry.
///
/// Members without a `kid` cannot be addressed by a token header and are
/// skipped; symmetric entries are never acceptable for upstream ID tokens.
fn index_entry(jwk: &Jwk) -> Option<(String, DecodingKey)> {
    let kid = jwk.common.key_id.clone()?;
    let key = match &jwk.algorithm {
        AlgorithmParameters::RSA(params) => {
            DecodingKey::from_rsa_components(&params.n, &params.e).ok()?
        }
        AlgorithmParameters::EllipticCurve(params) => {
            DecodingKey::from_ec_components(&params.x, &params.y).ok()?
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => return None,
    };
    Some((kid, key))
}
