//! Bearer token extraction from the `Authorization` header.

use std::fmt;

use http::HeaderMap;
use http::header::AUTHORIZATION;

use crate::{Error, Result};

/// The unverified token string taken from a request.
#[derive(Clone, PartialEq, Eq)]
pub struct RawToken(String);

impl RawToken {
    /// Wrap a token obtained some other way, e.g. from a CLI argument.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawToken(<redacted>)")
    }
}

/// Parse an `Authorization` header value of the form `Bearer <token>`.
///
/// `None` means the header was absent.
pub fn extract_bearer(header: Option<&str>) -> Result<RawToken> {
    let value = header.ok_or(Error::MissingHeader)?;

    let parts: Vec<&str> = value.split(' ').collect();
    if parts.len() != 2 {
        return Err(Error::MalformedHeader(
            "expected exactly two space-separated parts".to_string(),
        ));
    }
    if !parts[0].eq_ignore_ascii_case("bearer") {
        return Err(Error::MalformedHeader(
            "authorization scheme must be Bearer".to_string(),
        ));
    }
    if parts[1].is_empty() {
        return Err(Error::MalformedHeader("empty bearer token".to_string()));
    }

    Ok(RawToken::new(parts[1]))
}

/// Extract the bearer token from request headers.
///
/// A repeated `Authorization` header or one that is not visible ASCII is malformed.
pub fn extract_from_headers(headers: &HeaderMap) -> Result<RawToken> {
    let mut values = headers.get_all(AUTHORIZATION).iter();
    let Some(first) = values.next() else {
        return Err(Error::MissingHeader);
    };
    if values.next().is_some() {
        return Err(Error::MalformedHeader(
            "multiple Authorization headers".to_string(),
        ));
    }
    let value = first
        .to_str()
        .map_err(|_| Error::MalformedHeader("header is not visible ASCII".to_string()))?;
    extract_bearer(Some(value))
}
