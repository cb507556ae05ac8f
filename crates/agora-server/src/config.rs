use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use agora_chat::ChatConfig;

/// JWT secrets shipped in examples that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const DEFAULT_EXTENSIONS: &str = "png,jpg,jpeg,gif,webp,pdf,txt,md,doc,docx,zip";

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub storage_dir: PathBuf,
    pub receipt_list_limit: u32,
    pub rate_limit_per_minute: u64,
    pub allowed_extensions: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("AGORA_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("AGORA_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let host = get("AGORA_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("AGORA_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("AGORA_PORT must be a port number")?;
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let receipt_list_limit = match get("AGORA_RECEIPT_LIST_LIMIT") {
            Some(v) => v.parse().context("AGORA_RECEIPT_LIST_LIMIT must be a number")?,
            None => 50,
        };
        let rate_limit_per_minute = match get("AGORA_RATE_LIMIT_PER_MINUTE") {
            Some(v) => v.parse().context("AGORA_RATE_LIMIT_PER_MINUTE must be a number")?,
            None => 120,
        };

        Ok(Self {
            jwt_secret,
            db_path: get("AGORA_DB_PATH").unwrap_or_else(|| "agora.db".into()).into(),
            addr,
            storage_dir: get("AGORA_STORAGE_DIR")
                .unwrap_or_else(|| "./uploads".into())
                .into(),
            receipt_list_limit,
            rate_limit_per_minute,
            allowed_extensions: get("AGORA_ALLOWED_FILE_EXTENSIONS")
                .unwrap_or_else(|| DEFAULT_EXTENSIONS.into()),
        })
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            receipt_list_limit: self.receipt_list_limit,
            ..ChatConfig::default()
        }
    }
}
