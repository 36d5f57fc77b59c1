//! Error types.

use std::fmt;

use http::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons an authorization attempt is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No `Authorization` header on the request.
    #[error("missing Authorization header")]
    MissingHeader,

    /// `Authorization` header is not of the form `Bearer <token>`.
    #[error("malformed Authorization header: {0}")]
    MalformedHeader(String),

    /// Token is not three base64url segments with a usable header.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Token header declares an algorithm other than the configured one.
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The key set has no key with the token's `kid`, even after a refetch.
    #[error("unknown signing key: {0}")]
    UnknownSigningKey(String),

    /// The key set could not be fetched or parsed.
    #[error("key set unavailable: {0}")]
    KeySetUnavailable(String),

    /// Signature does not verify against the resolved key.
    #[error("invalid token signature")]
    InvalidSignature,

    /// `exp` is not in the future.
    #[error("token expired")]
    TokenExpired,

    /// `nbf` is in the future.
    #[error("token not yet valid")]
    TokenNotYetValid,

    /// `iss` does not match the configured issuer.
    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),

    /// `aud` does not contain the configured audience.
    #[error("invalid audience")]
    InvalidAudience,

    /// A required claim is missing or has the wrong shape.
    #[error("malformed claims: {0}")]
    MalformedClaims(String),

    /// The token is valid but lacks the required permission.
    #[error("permission not found: {0}")]
    InsufficientPermission(String),
}

impl Error {
    /// HTTP status the routing layer should answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::KeySetUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::InsufficientPermission(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Machine-readable code string.
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingHeader | Error::MalformedHeader(_) => "invalid_header",
            Error::MalformedToken(_)
            | Error::UnsupportedAlgorithm(_)
            | Error::MalformedClaims(_)
            | Error::InvalidIssuer(_)
            | Error::InvalidAudience => "invalid_claims",
            Error::TokenExpired | Error::TokenNotYetValid => "token_expired",
            Error::InvalidSignature | Error::UnknownSigningKey(_) => "invalid_token",
            Error::KeySetUnavailable(_) => "key_set_unavailable",
            Error::InsufficientPermission(_) => "unauthorized",
        }
    }
}

/// The step of an authorization attempt that rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading the bearer token out of the request headers.
    Extract,
    /// Signature and claim verification.
    Verify,
    /// Permission membership check.
    Permission,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Extract => "extract",
            Stage::Verify => "verify",
            Stage::Permission => "permission",
        })
    }
}

/// Failure returned by `AuthGuard`, tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("authorization rejected at {stage}: {kind}")]
pub struct AuthorizationError {
    stage: Stage,
    #[source]
    kind: Error,
}

impl AuthorizationError {
    pub(crate) fn new(stage: Stage, kind: Error) -> Self {
        Self { stage, kind }
    }

    /// Stage that rejected the attempt.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Underlying failure kind.
    pub fn kind(&self) -> &Error {
        &self.kind
    }

    /// HTTP status for the failure.
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Machine-readable code string.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// JSON error body in the shape the service's other error handlers use.
    pub fn to_body(&self) -> Value {
        json!({
            "success": false,
            "error": self.status().as_u16(),
            "message": self.code(),
        })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for `AuthConfig`.
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// A setting has an unusable value.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// A setting required by the requested operation is not set.
    #[error("missing config value: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_code_table() {
        let cases = [
            (Error::MissingHeader, 401, "invalid_header"),
            (Error::MalformedHeader("x".into()), 401, "invalid_header"),
            (Error::MalformedToken("x".into()), 401, "invalid_claims"),
            (Error::UnsupportedAlgorithm("HS256".into()), 401, "invalid_claims"),
            (Error::MalformedClaims("x".into()), 401, "invalid_claims"),
            (Error::InvalidIssuer("x".into()), 401, "invalid_claims"),
            (Error::InvalidAudience, 401, "invalid_claims"),
            (Error::TokenExpired, 401, "token_expired"),
            (Error::InvalidSignature, 401, "invalid_token"),
            (Error::UnknownSigningKey("k".into()), 401, "invalid_token"),
            (Error::KeySetUnavailable("x".into()), 500, "key_set_unavailable"),
            (Error::InsufficientPermission("p".into()), 403, "unauthorized"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status().as_u16(), status, "{err}");
            assert_eq!(err.code(), code, "{err}");
        }
    }

    #[test]
    fn body_matches_error_handler_shape() {
        let err = AuthorizationError::new(
            Stage::Permission,
            Error::InsufficientPermission("delete:movies".into()),
        );
        assert_eq!(
            err.to_body(),
            json!({"success": false, "error": 403, "message": "unauthorized"})
        );
        assert!(err.to_string().contains("permission"));
    }
}
