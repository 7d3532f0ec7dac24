use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// JWT secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
    "changeme",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub token_ttl: chrono::Duration,
    pub store_timeout: Duration,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("PLAZA_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PLAZA_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let ttl_hours: i64 = parse_or(&get, "PLAZA_TOKEN_TTL_HOURS", 24)?;
        if ttl_hours <= 0 {
            bail!("PLAZA_TOKEN_TTL_HOURS must be positive");
        }

        let cors_origins = get("PLAZA_CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            jwt_secret,
            db_path: get("PLAZA_DB_PATH")
                .unwrap_or_else(|| "plaza.db".into())
                .into(),
            host: get("PLAZA_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "PLAZA_PORT", 7000)?,
            token_ttl: chrono::Duration::hours(ttl_hours),
            store_timeout: Duration::from_millis(parse_or(&get, "PLAZA_STORE_TIMEOUT_MS", 5000)?),
            cors_origins,
            max_body_bytes: parse_or(&get, "PLAZA_MAX_BODY_BYTES", 10 * 1024 * 1024)?,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
