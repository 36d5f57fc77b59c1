//! Key and token fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use casting_auth::{AuthConfig, AuthGuard};
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const AUDIENCE: &str = "casting";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Two RSA keys, generated once per test binary.
pub fn keys() -> &'static [RsaPrivateKey; 2] {
    static KEYS: OnceLock<[RsaPrivateKey; 2]> = OnceLock::new();
    KEYS.get_or_init(|| {
        [
            RsaPrivateKey::new(&mut OsRng, 2048).unwrap(),
            RsaPrivateKey::new(&mut OsRng, 2048).unwrap(),
        ]
    })
}

pub fn primary() -> &'static RsaPrivateKey {
    &keys()[0]
}

pub fn secondary() -> &'static RsaPrivateKey {
    &keys()[1]
}

pub fn jwk(key: &RsaPrivateKey, kid: &str) -> Value {
    let public = key.to_public_key();
    json!({
        "kty": "RSA",
        "kid": kid,
        "use": "sig",
        "alg": "RS256",
        "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
        "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
    })
}

pub fn jwks(entries: &[(&RsaPrivateKey, &str)]) -> Value {
    json!({
        "keys": entries.iter().map(|(key, kid)| jwk(key, kid)).collect::<Vec<_>>()
    })
}

pub fn now() -> i64 {
    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    )
    .unwrap()
}

pub fn issuer(server: &MockServer) -> String {
    format!("{}/", server.uri())
}

/// Claims of a token valid for an hour.
pub fn claims(server: &MockServer, permissions: &[&str]) -> Value {
    json!({
        "iss": issuer(server),
        "sub": "auth0|casting-director",
        "aud": [AUDIENCE, "https://casting.eu.auth0.com/userinfo"],
        "iat": now(),
        "exp": now() + 3600,
        "permissions": permissions,
    })
}

pub fn sign(key: &RsaPrivateKey, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

pub fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    headers
}

pub fn jwks_response(body: Value) -> Mock {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
}

pub fn config(server: &MockServer) -> AuthConfig {
    let mut config = AuthConfig::new(issuer(server), AUDIENCE);
    config.refetch_timeout_ms = 1_000;
    config
}

pub fn guard(server: &MockServer) -> AuthGuard {
    AuthGuard::from_config(&config(server)).unwrap()
}

pub async fn fetches(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|r| r.len())
        .unwrap_or_default()
}
