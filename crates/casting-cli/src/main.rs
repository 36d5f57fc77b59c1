mod commands;

use std::path::PathBuf;

use anyhow::Context;
use casting_auth::AuthConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{config, tokens};

#[derive(Debug, Parser)]
#[command(name = "casting", about = "Casting API authorization tools")]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Path to casting-auth.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Fetch the issuer's key set and list its key ids
    Keys,
    /// Verify a token and check a permission, as a protected route would
    Verify {
        /// Bearer token (without the "Bearer " prefix)
        #[arg(long, env = "CASTING_TOKEN", hide_env_values = true)]
        token: String,
        /// Required permission, e.g. "post:movies". Empty means none.
        #[arg(long, default_value = "")]
        permission: String,
    },
    /// Print the identity provider login URL
    LoginUrl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Init { force } => config::cmd_init(&config_path, force, cli.json),
        Commands::Keys => tokens::cmd_keys(&load_config(&config_path)?, cli.json).await,
        Commands::Verify { token, permission } => {
            tokens::cmd_verify(&load_config(&config_path)?, &token, &permission, cli.json).await
        }
        Commands::LoginUrl => config::cmd_login_url(&load_config(&config_path)?, cli.json),
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("casting")
        .join("casting-auth.toml")
}

/// Config file if present, then `CASTING_AUTH_*` overrides.
fn load_config(path: &std::path::Path) -> anyhow::Result<AuthConfig> {
    let mut config = if path.exists() {
        AuthConfig::load_from_file(path)?
    } else {
        tracing::debug!(path = %path.display(), "no config file; using environment only");
        AuthConfig::new("", "")
    };
    config.apply_env().with_context(|| {
        format!(
            "auth config incomplete.\n\
             Run `casting init` and edit {}, or set CASTING_AUTH_ISSUER and CASTING_AUTH_AUDIENCE",
            path.display()
        )
    })?;
    Ok(config)
}

pub fn pout(json_mode: bool, value: serde_json::Value, text: &str) -> anyhow::Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{text}");
    }
    Ok(())
}
