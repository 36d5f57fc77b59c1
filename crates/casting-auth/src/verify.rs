//! Signature and claim verification.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::claims::{Claims, RawClaims};
use crate::extract::RawToken;
use crate::jwks::KeySetCache;
use crate::{Error, Result};

/// Source of the current time, in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Now.
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Header fields read before the token is trusted.
#[derive(Debug, Deserialize)]
struct UntrustedHeader {
    alg: Option<String>,
    kid: Option<String>,
}

/// Verifies tokens from a single issuer against its key set.
#[derive(Clone)]
pub struct ClaimsVerifier {
    keys: KeySetCache,
    issuer: String,
    audience: String,
    algorithm: Algorithm,
    leeway_seconds: i64,
    clock: Arc<dyn Clock>,
}

impl ClaimsVerifier {
    /// RS256 verifier with no leeway, using the system clock.
    pub fn new(keys: KeySetCache, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            algorithm: Algorithm::RS256,
            leeway_seconds: 0,
            clock: Arc::new(SystemClock),
        }
    }

    /// Accept tokens signed with `algorithm` instead of RS256.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Clock skew tolerated on `exp` and `nbf`.
    #[must_use]
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway_seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        self
    }

    /// Use `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Key cache used for `kid` resolution.
    pub fn keys(&self) -> &KeySetCache {
        &self.keys
    }

    /// Verify `token` and return its claims.
    pub async fn verify(&self, token: &RawToken) -> Result<Claims> {
        let token = token.as_str();
        let header = decode_untrusted_header(token)?;

        let alg = header
            .alg
            .ok_or_else(|| Error::MalformedToken("header missing alg".to_string()))?;
        let kid = header
            .kid
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::MalformedToken("header missing kid".to_string()))?;

        if alg.parse::<Algorithm>().ok() != Some(self.algorithm) {
            return Err(Error::UnsupportedAlgorithm(alg));
        }

        let key = self.keys.resolve(&kid).await?;
        if key.algorithm().is_some_and(|a| a != self.algorithm) {
            return Err(Error::InvalidSignature);
        }

        // Claim checks are done below against the injected clock.
        let mut validation = Validation::new(self.algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<Value>(token, key.decoding_key(), &validation)
            .map_err(classify_decode_error)?;
        debug!(kid = %kid, "token signature verified");

        let raw: RawClaims = serde_json::from_value(data.claims)
            .map_err(|e| Error::MalformedClaims(e.to_string()))?;
        self.validate_claims(raw)
    }

    fn validate_claims(&self, raw: RawClaims) -> Result<Claims> {
        let iss = raw.iss.ok_or_else(|| missing("iss"))?;
        let sub = raw.sub.ok_or_else(|| missing("sub"))?;
        let aud = raw.aud.ok_or_else(|| missing("aud"))?;
        let exp = raw.exp.ok_or_else(|| missing("exp"))?;

        let now = self.clock.now();
        if exp.saturating_add(self.leeway_seconds) <= now {
            return Err(Error::TokenExpired);
        }
        if let Some(nbf) = raw.nbf {
            if nbf > now.saturating_add(self.leeway_seconds) {
                return Err(Error::TokenNotYetValid);
            }
        }
        if iss != self.issuer {
            return Err(Error::InvalidIssuer(iss));
        }
        if !aud.contains(&self.audience) {
            return Err(Error::InvalidAudience);
        }

        Ok(Claims::verified(iss, sub, aud, exp, raw.nbf, raw.iat, raw.permissions))
    }
}

impl std::fmt::Debug for ClaimsVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsVerifier")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("algorithm", &self.algorithm)
            .field("leeway_seconds", &self.leeway_seconds)
            .finish_non_exhaustive()
    }
}

fn missing(claim: &str) -> Error {
    Error::MalformedClaims(format!("missing {claim}"))
}

fn decode_untrusted_header(token: &str) -> Result<UntrustedHeader> {
    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::MalformedToken(
            "expected three dot-separated segments".to_string(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| Error::MalformedToken(format!("header is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedToken(format!("header is not a JSON object: {e}")))
}

fn classify_decode_error(err: jsonwebtoken::errors::Error) -> Error {
    match err.kind() {
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => Error::MalformedToken(err.to_string()),
        ErrorKind::Json(_) | ErrorKind::Utf8(_) => Error::MalformedClaims(err.to_string()),
        _ => Error::InvalidSignature,
    }
}
