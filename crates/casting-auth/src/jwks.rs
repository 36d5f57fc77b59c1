//! Signing key resolution against the issuer's JWKS.
//!
//! [`KeySetCache`] holds an immutable [`KeySet`] snapshot behind an `Arc`.
//! Lookups clone the snapshot and never wait on I/O. A `kid` miss triggers one
//! refetch; concurrent misses queue on the refresh lock and reuse the outcome
//! of an attempt that finished while they were waiting.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// A JWKS document as published by the issuer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JwksDocument {
    /// Keys.
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

/// Minimal JWK structure for RSA and EC keys.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC").
    pub kty: String,

    /// Key id.
    pub kid: Option<String>,

    /// Public key use.
    #[serde(rename = "use")]
    pub use_: Option<String>,

    /// Algorithm (optional).
    pub alg: Option<String>,

    // RSA
    /// RSA modulus.
    pub n: Option<String>,
    /// RSA exponent.
    pub e: Option<String>,

    // EC
    /// Curve name.
    pub crv: Option<String>,
    /// EC x coordinate.
    pub x: Option<String>,
    /// EC y coordinate.
    pub y: Option<String>,
}

/// A public key usable for signature verification.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    kty: String,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl SigningKey {
    /// Build a key from a JWK entry. Returns the reason when the entry is unusable.
    pub(crate) fn from_jwk(jwk: &Jwk) -> std::result::Result<Self, String> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| "JWK missing kid".to_string())?;

        if let Some(use_) = jwk.use_.as_deref() {
            if use_ != "sig" {
                return Err(format!("JWK {kid} has use={use_}"));
            }
        }

        let algorithm = match jwk.alg.as_deref() {
            Some(alg) => Some(
                alg.parse::<Algorithm>()
                    .map_err(|_| format!("JWK {kid} has unknown alg {alg}"))?,
            ),
            None => None,
        };

        let key = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk
                    .n
                    .as_deref()
                    .ok_or_else(|| format!("RSA JWK {kid} missing n"))?;
                let e = jwk
                    .e
                    .as_deref()
                    .ok_or_else(|| format!("RSA JWK {kid} missing e"))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| format!("RSA JWK {kid}: {err}"))?
            }
            "EC" => {
                let x = jwk
                    .x
                    .as_deref()
                    .ok_or_else(|| format!("EC JWK {kid} missing x"))?;
                let y = jwk
                    .y
                    .as_deref()
                    .ok_or_else(|| format!("EC JWK {kid} missing y"))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|err| format!("EC JWK {kid}: {err}"))?
            }
            other => return Err(format!("JWK {kid} has unsupported kty {other}")),
        };

        Ok(Self {
            kid: kid.to_string(),
            kty: jwk.kty.clone(),
            algorithm,
            key,
        })
    }

    /// Key id.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Key type as published.
    pub fn kty(&self) -> &str {
        &self.kty
    }

    /// Algorithm the issuer declared for this key, if any.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("kty", &self.kty)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Immutable set of signing keys indexed by `kid`.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
    generation: u64,
}

impl KeySet {
    /// Build a key set from a JWKS document. Unusable entries are skipped.
    pub fn from_document(doc: &JwksDocument, generation: u64) -> Self {
        let mut keys = HashMap::with_capacity(doc.keys.len());
        for jwk in &doc.keys {
            match SigningKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(key.kid.clone(), Arc::new(key));
                }
                Err(reason) => debug!(%reason, "skipping JWK"),
            }
        }
        Self { keys, generation }
    }

    /// Look up a key by id.
    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    /// Number of usable keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if there are no usable keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids, sorted.
    pub fn kids(&self) -> Vec<&str> {
        let mut kids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        kids.sort_unstable();
        kids
    }

    /// Fetch attempt that produced this set; 0 for the initial empty set.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Source of JWKS documents.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Fetch the current document. Failures are reported as [`Error::KeySetUnavailable`].
    async fn fetch(&self) -> Result<JwksDocument>;
}

/// Fetches the JWKS over HTTP.
#[cfg(feature = "fetch-reqwest")]
#[derive(Debug, Clone)]
pub struct HttpKeySetFetcher {
    url: String,
    client: reqwest::Client,
}

#[cfg(feature = "fetch-reqwest")]
impl HttpKeySetFetcher {
    /// Create a fetcher for `url` whose requests time out after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::KeySetUnavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// JWKS URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "fetch-reqwest")]
#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self) -> Result<JwksDocument> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::KeySetUnavailable(format!("fetch failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::KeySetUnavailable(format!(
                "fetch failed: {}",
                resp.status()
            )));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| Error::KeySetUnavailable(format!("failed to read body: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::KeySetUnavailable(format!("invalid JWKS document: {e}")))
    }
}

struct RefreshState {
    last_error: Option<Error>,
}

struct Inner {
    fetcher: Arc<dyn KeySetFetcher>,
    timeout: Duration,
    current: RwLock<Arc<KeySet>>,
    // Completed fetch attempts. Only written while `refresh` is held.
    attempts: AtomicU64,
    refresh: Mutex<RefreshState>,
}

impl Inner {
    fn snapshot(&self) -> Arc<KeySet> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    async fn refresh_after(&self, seen_attempts: u64) -> Result<Arc<KeySet>> {
        let mut state = self.refresh.lock().await;

        let attempts = self.attempts.load(Ordering::Acquire);
        if attempts != seen_attempts {
            debug!(attempts, "reusing key set refresh completed while waiting");
            return match &state.last_error {
                Some(err) => Err(err.clone()),
                None => Ok(self.snapshot()),
            };
        }

        let generation = attempts + 1;
        let outcome = match tokio::time::timeout(self.timeout, self.fetcher.fetch()).await {
            Ok(Ok(doc)) => {
                let set = Arc::new(KeySet::from_document(&doc, generation));
                *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&set);
                info!(keys = set.len(), generation, "key set refreshed");
                Ok(set)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::KeySetUnavailable(format!(
                "fetch timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };

        if let Err(err) = &outcome {
            warn!(error = %err, "key set refresh failed; keeping cached keys");
        }
        state.last_error = outcome.as_ref().err().cloned();
        self.attempts.store(generation, Ordering::Release);
        outcome
    }
}

/// Shared cache of the issuer's signing keys.
///
/// Cloning is cheap; clones share the same key set.
#[derive(Clone)]
pub struct KeySetCache {
    inner: Arc<Inner>,
}

impl KeySetCache {
    /// Create an empty cache. Fetches are bounded by `timeout`.
    pub fn new(fetcher: Arc<dyn KeySetFetcher>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                timeout,
                current: RwLock::new(Arc::new(KeySet::default())),
                attempts: AtomicU64::new(0),
                refresh: Mutex::new(RefreshState { last_error: None }),
            }),
        }
    }

    /// Convenience constructor for an HTTP JWKS endpoint.
    #[cfg(feature = "fetch-reqwest")]
    pub fn from_url(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let fetcher = HttpKeySetFetcher::new(url, timeout)?;
        Ok(Self::new(Arc::new(fetcher), timeout))
    }

    /// Current key set snapshot.
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.inner.snapshot()
    }

    /// Number of completed fetch attempts, successful or not.
    pub fn fetch_count(&self) -> u64 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Resolve a key by id, refetching the key set once on a miss.
    pub async fn resolve(&self, kid: &str) -> Result<Arc<SigningKey>> {
        let seen = self.fetch_count();
        if let Some(key) = self.snapshot().get(kid) {
            debug!(kid, "signing key cache hit");
            return Ok(key);
        }

        debug!(kid, "signing key cache miss");
        let set = self.refresh_after(seen).await?;
        set.get(kid)
            .ok_or_else(|| Error::UnknownSigningKey(kid.to_string()))
    }

    /// Fetch the key set now, e.g. at startup.
    pub async fn refresh(&self) -> Result<Arc<KeySet>> {
        self.refresh_after(self.fetch_count()).await
    }

    // The refresh runs in its own task so that dropping the caller does not
    // abandon a fetch other callers are queued behind.
    async fn refresh_after(&self, seen_attempts: u64) -> Result<Arc<KeySet>> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.refresh_after(seen_attempts).await })
            .await
            .map_err(|e| Error::KeySetUnavailable(format!("key set refresh aborted: {e}")))?
    }
}

impl fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySetCache")
            .field("timeout", &self.inner.timeout)
            .field("fetch_count", &self.fetch_count())
            .field("keys", &self.snapshot().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const N: &str = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";

    fn rsa_jwk(kid: &str) -> Jwk {
        Jwk {
            kty: "RSA".into(),
            kid: Some(kid.into()),
            use_: Some("sig".into()),
            alg: Some("RS256".into()),
            n: Some(N.into()),
            e: Some("AQAB".into()),
            ..Default::default()
        }
    }

    struct ScriptedFetcher {
        responses: std::sync::Mutex<Vec<Result<JwksDocument>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<JwksDocument>>) -> Arc<Self> {
            Self::with_delay(responses, Duration::ZERO)
        }

        fn with_delay(responses: Vec<Result<JwksDocument>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeySetFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<JwksDocument> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            }
        }
    }

    fn doc(kids: &[&str]) -> JwksDocument {
        JwksDocument {
            keys: kids.iter().map(|k| rsa_jwk(k)).collect(),
        }
    }

    #[test]
    fn key_set_skips_unusable_entries() {
        let mut enc = rsa_jwk("enc");
        enc.use_ = Some("enc".into());
        let oct = Jwk {
            kty: "oct".into(),
            kid: Some("hmac".into()),
            ..Default::default()
        };
        let mut no_kid = rsa_jwk("x");
        no_kid.kid = None;
        let mut no_n = rsa_jwk("no-n");
        no_n.n = None;

        let set = KeySet::from_document(
            &JwksDocument {
                keys: vec![rsa_jwk("good"), enc, oct, no_kid, no_n],
            },
            1,
        );
        assert_eq!(set.kids(), vec!["good"]);
        assert_eq!(set.get("good").unwrap().algorithm(), Some(Algorithm::RS256));
    }

    #[tokio::test]
    async fn hit_does_not_refetch() {
        let fetcher = ScriptedFetcher::new(vec![Ok(doc(&["k1"]))]);
        let cache = KeySetCache::new(fetcher.clone(), Duration::from_secs(1));

        let first = cache.resolve("k1").await.unwrap();
        let second = cache.resolve("k1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn miss_refetches_once_then_fails() {
        let fetcher = ScriptedFetcher::new(vec![Ok(doc(&["k1"]))]);
        let cache = KeySetCache::new(fetcher.clone(), Duration::from_secs(1));
        cache.refresh().await.unwrap();

        let err = cache.resolve("rotated").await.unwrap_err();
        assert_eq!(err, Error::UnknownSigningKey("rotated".into()));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn rotation_picks_up_new_kid() {
        let fetcher = ScriptedFetcher::new(vec![Ok(doc(&["old"])), Ok(doc(&["old", "new"]))]);
        let cache = KeySetCache::new(fetcher.clone(), Duration::from_secs(1));
        cache.refresh().await.unwrap();

        assert_eq!(cache.resolve("new").await.unwrap().kid(), "new");
        assert_eq!(cache.snapshot().generation(), 2);
    }

    #[tokio::test]
    async fn failed_refetch_keeps_stale_keys() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(doc(&["k1"])),
            Err(Error::KeySetUnavailable("boom".into())),
        ]);
        let cache = KeySetCache::new(fetcher.clone(), Duration::from_secs(1));
        cache.refresh().await.unwrap();

        let err = cache.resolve("k2").await.unwrap_err();
        assert!(matches!(err, Error::KeySetUnavailable(_)));
        assert!(cache.resolve("k1").await.is_ok());
        assert_eq!(cache.snapshot().kids(), vec!["k1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_is_key_set_unavailable() {
        let fetcher = ScriptedFetcher::with_delay(vec![Ok(doc(&["k1"]))], Duration::from_secs(30));
        let cache = KeySetCache::new(fetcher, Duration::from_secs(2));

        let err = cache.resolve("k1").await.unwrap_err();
        assert!(matches!(err, Error::KeySetUnavailable(ref m) if m.contains("timed out")));
        assert_eq!(err.status().as_u16(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let fetcher = ScriptedFetcher::with_delay(vec![Ok(doc(&["k1"]))], Duration::from_millis(50));
        let cache = KeySetCache::new(fetcher.clone(), Duration::from_secs(2));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.resolve("k1").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_failure() {
        let fetcher = ScriptedFetcher::with_delay(
            vec![Err(Error::KeySetUnavailable("down".into()))],
            Duration::from_millis(50),
        );
        let cache = KeySetCache::new(fetcher.clone(), Duration::from_secs(2));

        let (a, b) = tokio::join!(cache.resolve("k1"), cache.resolve("k1"));
        assert!(matches!(a, Err(Error::KeySetUnavailable(_))));
        assert!(matches!(b, Err(Error::KeySetUnavailable(_))));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_does_not_cancel_refresh() {
        let fetcher = ScriptedFetcher::with_delay(vec![Ok(doc(&["k1"]))], Duration::from_millis(100));
        let cache = KeySetCache::new(fetcher.clone(), Duration::from_secs(2));

        let abandoned = tokio::time::timeout(Duration::from_millis(10), cache.resolve("k1")).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.snapshot().kids(), vec!["k1"]);
        assert!(cache.resolve("k1").await.is_ok());
        assert_eq!(fetcher.calls(), 1);
    }
}
