//! The request-facing guard.
//!
//! An attempt moves `Start → HeaderExtracted → SignatureVerified/ClaimsValidated
//! → PermissionChecked → Authorized`, or stops at the first rejection.

use std::future::Future;
#[cfg(feature = "fetch-reqwest")]
use std::time::Duration;

use http::HeaderMap;
use tracing::debug;

use crate::claims::Claims;
#[cfg(feature = "fetch-reqwest")]
use crate::config::AuthConfig;
#[cfg(feature = "fetch-reqwest")]
use crate::error::ConfigError;
use crate::error::{AuthorizationError, Stage};
use crate::extract::{RawToken, extract_bearer, extract_from_headers};
use crate::gate::{RequiredPermission, check};
#[cfg(feature = "fetch-reqwest")]
use crate::jwks::KeySetCache;
use crate::verify::ClaimsVerifier;

/// Authorizes requests for a required permission.
///
/// Cheap to clone; clones share the verifier's key cache.
#[derive(Debug, Clone)]
pub struct AuthGuard {
    verifier: ClaimsVerifier,
}

impl AuthGuard {
    /// Guard using `verifier`.
    pub fn new(verifier: ClaimsVerifier) -> Self {
        Self { verifier }
    }

    /// Build the full stack (HTTP key fetcher, cache, verifier) from configuration.
    #[cfg(feature = "fetch-reqwest")]
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let timeout = Duration::from_millis(config.refetch_timeout_ms);
        let keys = KeySetCache::from_url(config.jwks_url(), timeout).map_err(|e| {
            ConfigError::Invalid {
                field: "jwks_path",
                reason: e.to_string(),
            }
        })?;
        let verifier = ClaimsVerifier::new(keys, &config.issuer, &config.audience)
            .with_algorithm(config.algorithm()?)
            .with_leeway(config.leeway_seconds);
        Ok(Self::new(verifier))
    }

    /// Verifier behind this guard.
    pub fn verifier(&self) -> &ClaimsVerifier {
        &self.verifier
    }

    /// Authorize a request by its headers.
    pub async fn authorize(
        &self,
        headers: &HeaderMap,
        required: &RequiredPermission,
    ) -> Result<Claims, AuthorizationError> {
        let token = extract_from_headers(headers).map_err(|e| reject(Stage::Extract, e))?;
        self.authorize_token(&token, required).await
    }

    /// Authorize by a raw `Authorization` header value; `None` when absent.
    pub async fn authorize_header(
        &self,
        header: Option<&str>,
        required: &RequiredPermission,
    ) -> Result<Claims, AuthorizationError> {
        let token = extract_bearer(header).map_err(|e| reject(Stage::Extract, e))?;
        self.authorize_token(&token, required).await
    }

    async fn authorize_token(
        &self,
        token: &RawToken,
        required: &RequiredPermission,
    ) -> Result<Claims, AuthorizationError> {
        debug!("header extracted");
        let claims = self
            .verifier
            .verify(token)
            .await
            .map_err(|e| reject(Stage::Verify, e))?;
        debug!(sub = claims.subject(), "claims validated");

        check(&claims, required).map_err(|e| reject(Stage::Permission, e))?;
        debug!(sub = claims.subject(), required = %required, "authorized");
        Ok(claims)
    }

    /// Wrap `op` so it only runs for requests holding `required`.
    ///
    /// `op` receives the verified claims and the caller's input.
    pub fn protect<F>(&self, required: impl Into<RequiredPermission>, op: F) -> Protected<F> {
        Protected {
            guard: self.clone(),
            required: required.into(),
            op,
        }
    }
}

fn reject(stage: Stage, kind: crate::Error) -> AuthorizationError {
    debug!(%stage, code = kind.code(), error = %kind, "authorization rejected");
    AuthorizationError::new(stage, kind)
}

/// An operation guarded by a required permission. Built by [`AuthGuard::protect`].
#[derive(Debug, Clone)]
pub struct Protected<F> {
    guard: AuthGuard,
    required: RequiredPermission,
    op: F,
}

impl<F> Protected<F> {
    /// Permission this operation requires.
    pub fn required(&self) -> &RequiredPermission {
        &self.required
    }

    /// Authorize `headers`, then run the operation with the claims and `input`.
    ///
    /// The operation is not invoked when authorization fails.
    pub async fn call<I, Fut, T>(&self, headers: &HeaderMap, input: I) -> Result<T, AuthorizationError>
    where
        F: Fn(Claims, I) -> Fut,
        Fut: Future<Output = T>,
    {
        let claims = self.guard.authorize(headers, &self.required).await?;
        Ok((self.op)(claims, input).await)
    }
}
