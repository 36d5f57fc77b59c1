use std::fs;
use std::path::Path;

use anyhow::Context;
use casting_auth::{AuthConfig, login_url};

use crate::pout;

const DEFAULT_CONFIG: &str = include_str!("../../../../docs/casting-auth.toml.example");

pub fn cmd_init(path: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;

    pout(
        json,
        serde_json::json!({"ok": true, "config": path}),
        &format!("Wrote {}", path.display()),
    )
}

pub fn cmd_login_url(config: &AuthConfig, json: bool) -> anyhow::Result<()> {
    let url = login_url(config)?;
    pout(json, serde_json::json!({"url": url.as_str()}), url.as_str())
}
