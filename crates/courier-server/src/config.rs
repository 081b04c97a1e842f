use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    /// How long a user stays online without any sign of life.
    pub presence_ttl: Duration,
    /// How often stale presence is swept.
    pub presence_sweep: Duration,
}

impl Config {
    /// Read the `COURIER_*` environment. Call `dotenvy::dotenv()` first to
    /// pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("COURIER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("COURIER_JWT_SECRET is unset or still a placeholder");
        }

        let db_path = lookup("COURIER_DB_PATH").unwrap_or_else(|| "courier.db".into());
        let host = lookup("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&lookup, "COURIER_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let ttl_secs: u64 = parse_or(&lookup, "COURIER_PRESENCE_TTL_SECS", 60)?;
        let sweep_secs: u64 = parse_or(&lookup, "COURIER_PRESENCE_SWEEP_SECS", 15)?;
        if ttl_secs == 0 || sweep_secs == 0 {
            bail!("presence TTL and sweep interval must be positive");
        }

        Ok(Self {
            jwt_secret,
            db_path: db_path.into(),
            addr,
            presence_ttl: Duration::from_secs(ttl_secs),
            presence_sweep: Duration::from_secs(sweep_secs),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
