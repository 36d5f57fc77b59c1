//! Authorization settings.

use std::fs;
use std::path::Path;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Default JWKS location relative to the issuer.
pub const DEFAULT_JWKS_PATH: &str = "/.well-known/jwks.json";

/// Default bound on a key set fetch.
pub const DEFAULT_REFETCH_TIMEOUT_MS: u64 = 5_000;

/// Settings for verifying tokens from one issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected `iss`, e.g. `https://tenant.auth0.com/`. Also the JWKS base URL.
    pub issuer: String,

    /// Expected `aud`.
    pub audience: String,

    /// JWKS path appended to the issuer.
    #[serde(default = "default_jwks_path")]
    pub jwks_path: String,

    /// Signing algorithm tokens must declare.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Bound on a key set fetch, in milliseconds.
    #[serde(default = "default_refetch_timeout_ms")]
    pub refetch_timeout_ms: u64,

    /// Clock skew tolerated on `exp`/`nbf`, in seconds.
    #[serde(default)]
    pub leeway_seconds: u64,

    /// Client id used to build the login URL.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Redirect target used to build the login URL.
    #[serde(default)]
    pub callback_url: Option<String>,
}

fn default_jwks_path() -> String {
    DEFAULT_JWKS_PATH.to_string()
}

fn default_algorithm() -> String {
    "RS256".to_string()
}

fn default_refetch_timeout_ms() -> u64 {
    DEFAULT_REFETCH_TIMEOUT_MS
}

impl AuthConfig {
    /// Config with defaults for everything but issuer and audience.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            jwks_path: default_jwks_path(),
            algorithm: default_algorithm(),
            refetch_timeout_ms: DEFAULT_REFETCH_TIMEOUT_MS,
            leeway_seconds: 0,
            client_id: None,
            callback_url: None,
        }
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    /// Override settings from `CASTING_AUTH_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());

        if let Some(v) = var("CASTING_AUTH_ISSUER") {
            self.issuer = v;
        }
        if let Some(v) = var("CASTING_AUTH_AUDIENCE") {
            self.audience = v;
        }
        if let Some(v) = var("CASTING_AUTH_JWKS_PATH") {
            self.jwks_path = v;
        }
        if let Some(v) = var("CASTING_AUTH_ALGORITHM") {
            self.algorithm = v;
        }
        if let Some(v) = var("CASTING_AUTH_REFETCH_TIMEOUT_MS") {
            self.refetch_timeout_ms = v.parse().map_err(|e| ConfigError::Invalid {
                field: "refetch_timeout_ms",
                reason: format!("{v:?}: {e}"),
            })?;
        }
        if let Some(v) = var("CASTING_AUTH_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = var("CASTING_AUTH_CALLBACK_URL") {
            self.callback_url = Some(v);
        }
        self.validate()
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("issuer"));
        }
        Url::parse(&self.issuer).map_err(|e| ConfigError::Invalid {
            field: "issuer",
            reason: e.to_string(),
        })?;
        if self.audience.trim().is_empty() {
            return Err(ConfigError::Missing("audience"));
        }
        if !self.jwks_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "jwks_path",
                reason: "must start with '/'".to_string(),
            });
        }
        if self.refetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "refetch_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.algorithm()?;
        Ok(())
    }

    /// Parsed signing algorithm. Only asymmetric algorithms are accepted.
    pub fn algorithm(&self) -> Result<Algorithm, ConfigError> {
        let alg = self
            .algorithm
            .parse::<Algorithm>()
            .map_err(|_| ConfigError::Invalid {
                field: "algorithm",
                reason: format!("unknown algorithm {}", self.algorithm),
            })?;
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Err(ConfigError::Invalid {
                field: "algorithm",
                reason: format!("{} is symmetric", self.algorithm),
            }),
            Algorithm::EdDSA => Err(ConfigError::Invalid {
                field: "algorithm",
                reason: format!("{} needs OKP keys, an unsupported key type", self.algorithm),
            }),
            other => Ok(other),
        }
    }

    /// Issuer without trailing slashes.
    pub fn issuer_base(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    /// Full JWKS URL.
    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.issuer_base(), self.jwks_path)
    }
}

/// Build the identity provider's implicit-flow login URL.
pub fn login_url(config: &AuthConfig) -> Result<Url, ConfigError> {
    let client_id = config
        .client_id
        .as_deref()
        .ok_or(ConfigError::Missing("client_id"))?;
    let callback_url = config
        .callback_url
        .as_deref()
        .ok_or(ConfigError::Missing("callback_url"))?;

    Url::parse_with_params(
        &format!("{}/authorize", config.issuer_base()),
        &[
            ("audience", config.audience.as_str()),
            ("response_type", "token"),
            ("client_id", client_id),
            ("redirect_uri", callback_url),
        ],
    )
    .map_err(|e| ConfigError::Invalid {
        field: "issuer",
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_fill_in() {
        let cfg = AuthConfig::from_toml(
            r#"
            issuer = "https://casting.eu.auth0.com/"
            audience = "casting"
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(cfg.jwks_path, DEFAULT_JWKS_PATH);
        assert_eq!(cfg.refetch_timeout_ms, 5_000);
        assert_eq!(cfg.algorithm().unwrap(), Algorithm::RS256);
        assert_eq!(
            cfg.jwks_url(),
            "https://casting.eu.auth0.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn parse_error_names_origin() {
        let err = AuthConfig::from_toml("issuer = 3", "casting-auth.toml").unwrap_err();
        assert!(err.to_string().contains("casting-auth.toml"));
    }

    #[test]
    fn rejects_symmetric_and_unknown_algorithms() {
        let mut cfg = AuthConfig::new("https://issuer.test/", "casting");
        cfg.algorithm = "HS256".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { field: "algorithm", .. })));
        cfg.algorithm = "none".into();
        assert!(cfg.validate().is_err());
        cfg.algorithm = "EdDSA".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { field: "algorithm", .. })));
        cfg.algorithm = "ES256".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_unusable_values() {
        let mut cfg = AuthConfig::new("", "casting");
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing("issuer"))));
        cfg.issuer = "not a url".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { field: "issuer", .. })));
        cfg.issuer = "https://issuer.test/".into();
        cfg.refetch_timeout_ms = 0;
        assert!(cfg.validate().is_err());
        cfg.refetch_timeout_ms = 1;
        cfg.jwks_path = "jwks.json".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides() {
        let vars = HashMap::from([
            ("CASTING_AUTH_AUDIENCE", "other"),
            ("CASTING_AUTH_REFETCH_TIMEOUT_MS", "250"),
            ("CASTING_AUTH_CLIENT_ID", ""),
        ]);
        let mut cfg = AuthConfig::new("https://issuer.test/", "casting");
        cfg.apply_vars(|name| vars.get(name).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(cfg.audience, "other");
        assert_eq!(cfg.refetch_timeout_ms, 250);
        assert_eq!(cfg.client_id, None);

        let bad = HashMap::from([("CASTING_AUTH_REFETCH_TIMEOUT_MS", "soon")]);
        assert!(cfg.apply_vars(|name| bad.get(name).map(|v| (*v).to_string())).is_err());
    }

    #[test]
    fn login_url_encodes_params() {
        let mut cfg = AuthConfig::new("https://casting.eu.auth0.com/", "casting api");
        assert!(matches!(login_url(&cfg), Err(ConfigError::Missing("client_id"))));

        cfg.client_id = Some("abc123".into());
        cfg.callback_url = Some("http://localhost:8080/login-results".into());
        let url = login_url(&cfg).unwrap();
        assert_eq!(url.path(), "/authorize");
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["audience"], "casting api");
        assert_eq!(params["response_type"], "token");
        assert_eq!(params["client_id"], "abc123");
        assert_eq!(params["redirect_uri"], "http://localhost:8080/login-results");
    }
}
