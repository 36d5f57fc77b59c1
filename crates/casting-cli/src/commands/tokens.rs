use casting_auth::{AuthConfig, AuthGuard, RequiredPermission};

use crate::pout;

pub async fn cmd_keys(config: &AuthConfig, json: bool) -> anyhow::Result<()> {
    let guard = AuthGuard::from_config(config)?;
    let set = guard.verifier().keys().refresh().await?;

    let keys: Vec<_> = set
        .kids()
        .into_iter()
        .filter_map(|kid| set.get(kid))
        .map(|key| {
            serde_json::json!({
                "kid": key.kid(),
                "kty": key.kty(),
                "alg": key.algorithm().map(|a| format!("{a:?}")),
            })
        })
        .collect();

    let text = if keys.is_empty() {
        format!("No usable keys at {}", config.jwks_url())
    } else {
        set.kids().join("\n")
    };
    pout(json, serde_json::json!({"jwks_url": config.jwks_url(), "keys": keys}), &text)
}

pub async fn cmd_verify(
    config: &AuthConfig,
    token: &str,
    permission: &str,
    json: bool,
) -> anyhow::Result<()> {
    let guard = AuthGuard::from_config(config)?;
    let required = RequiredPermission::new(permission);
    let header = format!("Bearer {}", token.trim());

    match guard.authorize_header(Some(&header), &required).await {
        Ok(claims) => {
            let text = format!(
                "Authorized {} ({} permissions)",
                claims.subject(),
                claims.permissions().len()
            );
            pout(json, serde_json::to_value(&claims)?, &text)
        }
        Err(err) => {
            let mut body = err.to_body();
            body["stage"] = err.stage().to_string().into();
            body["detail"] = err.kind().to_string().into();
            pout(json, body, &format!("{} {}: {err}", err.status(), err.code()))?;
            Err(err.into())
        }
    }
}
