//! casting-auth
//!
//! Bearer-token authorization for the casting service's protected routes.
//!
//! - **Extracting** the token from `Authorization: Bearer <token>`
//! - **Resolving signing keys** from the issuer's JWKS, cached in memory and refetched on unknown `kid`
//! - **Verifying** signature, `exp`/`nbf`, `iss` and `aud`
//! - **Checking** a required permission against the token's `permissions` claim
//!
//! The entry point is [`AuthGuard`]; every failure is an [`AuthorizationError`]
//! carrying the HTTP status and code string the routing layer should answer with.
//!
//! ## Quick start
//! ```no_run
//! use casting_auth::{AuthConfig, AuthGuard, RequiredPermission};
//!
//! # async fn demo(headers: http::HeaderMap) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::new("https://casting.eu.auth0.com/", "casting");
//! let guard = AuthGuard::from_config(&config)?;
//! guard.verifier().keys().refresh().await?;
//!
//! match guard.authorize(&headers, &RequiredPermission::new("post:movies")).await {
//!     Ok(claims) => println!("sub={}", claims.subject()),
//!     Err(err) => println!("{} {}", err.status(), err.code()),
//! }
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]

mod claims;
mod config;
mod error;
mod extract;
mod gate;
mod guard;
mod jwks;
mod verify;

pub use claims::{Audience, Claims};
pub use config::{AuthConfig, DEFAULT_JWKS_PATH, DEFAULT_REFETCH_TIMEOUT_MS, login_url};
pub use error::{AuthorizationError, ConfigError, Error, Result, Stage};
pub use extract::{RawToken, extract_bearer, extract_from_headers};
pub use gate::{RequiredPermission, check};
pub use guard::{AuthGuard, Protected};
#[cfg(feature = "fetch-reqwest")]
pub use jwks::HttpKeySetFetcher;
pub use jwks::{Jwk, JwksDocument, KeySet, KeySetCache, KeySetFetcher, SigningKey};
pub use verify::{ClaimsVerifier, Clock, SystemClock};

pub use jsonwebtoken::Algorithm;
