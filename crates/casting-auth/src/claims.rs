//! Verified token claims.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// Single audience.
    One(String),
    /// Several audiences.
    Many(Vec<String>),
}

impl Audience {
    /// True if `audience` is, or is among, the token's audiences.
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(a) => a == audience,
            Audience::Many(list) => list.iter().any(|a| a == audience),
        }
    }
}

/// Payload as it appears on the wire, before any check.
#[derive(Debug, Deserialize)]
pub(crate) struct RawClaims {
    pub iss: Option<String>,
    pub sub: Option<String>,
    pub aud: Option<Audience>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<i64>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub nbf: Option<i64>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub iat: Option<i64>,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

/// NumericDate: any JSON number of seconds, fractions floored to whole seconds.
#[allow(clippy::cast_possible_truncation)]
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.map(|secs| secs.floor() as i64))
}

/// Claims of a token that passed signature and claim verification.
///
/// Only `ClaimsVerifier` produces values of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    iss: String,
    sub: String,
    aud: Audience,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
    permissions: BTreeSet<String>,
}

impl Claims {
    pub(crate) fn verified(
        iss: String,
        sub: String,
        aud: Audience,
        exp: i64,
        nbf: Option<i64>,
        iat: Option<i64>,
        permissions: Option<Vec<String>>,
    ) -> Self {
        Self {
            iss,
            sub,
            aud,
            exp,
            nbf,
            iat,
            permissions: permissions.unwrap_or_default().into_iter().collect(),
        }
    }

    /// `iss`.
    pub fn issuer(&self) -> &str {
        &self.iss
    }

    /// `sub`.
    pub fn subject(&self) -> &str {
        &self.sub
    }

    /// `aud`.
    pub fn audience(&self) -> &Audience {
        &self.aud
    }

    /// `exp`, seconds since the epoch.
    pub fn expires_at(&self) -> i64 {
        self.exp
    }

    /// `nbf`, seconds since the epoch.
    pub fn not_before(&self) -> Option<i64> {
        self.nbf
    }

    /// `iat`, seconds since the epoch.
    pub fn issued_at(&self) -> Option<i64> {
        self.iat
    }

    /// Permission set; empty when the token carries no `permissions` claim.
    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    /// True if the permission set contains `permission`.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

#[cfg(test)]
impl Claims {
    pub(crate) fn for_test(permissions: Option<&[&str]>) -> Self {
        Self::verified(
            "https://issuer.test/".into(),
            "auth0|user".into(),
            Audience::One("casting".into()),
            i64::MAX,
            None,
            None,
            permissions.map(|p| p.iter().map(|s| (*s).to_string()).collect()),
        )
    }
}
