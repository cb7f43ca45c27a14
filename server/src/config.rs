use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use common::DEFAULT_TOKEN_TTL_MINUTES;
use tracing::warn;

/// Where dimension and fact rows live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres(PostgresSettings),
    /// In-process tables; nothing survives a restart.
    Memory,
}

#[derive(Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

impl fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .finish_non_exhaustive()
    }
}

impl PostgresSettings {
    /// Reads only the database variables, e.g. for integration tests.
    pub fn from_env() -> Result<Self> {
        postgres_settings(&|key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }
}

#[derive(Clone)]
pub struct Config {
    pub http_port: u16,
    pub storage: StorageBackend,
    pub api_key: String,
    pub jwt_secret: String,
    pub obs_key: Option<String>,
    pub trusted_emails: Vec<String>,
    pub token_ttl: chrono::Duration,
    /// Reverse proxies whose `X-Forwarded-For` is believed.
    pub trusted_proxies: Vec<IpAddr>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("http_port", &self.http_port)
            .field("storage", &self.storage)
            .field("api_key", &"<redacted>")
            .field("jwt_secret", &"<redacted>")
            .field("obs_key", &self.obs_key.as_ref().map(|_| "<redacted>"))
            .field("trusted_emails", &self.trusted_emails.len())
            .field("token_ttl", &self.token_ttl)
            .field("trusted_proxies", &self.trusted_proxies)
            .finish()
    }
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, treating blank values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).with_context(|| format!("{} must be set in environment or .env file", key));

        let api_key = require("STATS_API_KEY")?;
        let jwt_secret = require("STATS_JWT_SECRET")?;

        let obs_key = get("STATS_OBS_KEY");
        if obs_key.is_none() {
            warn!("STATS_OBS_KEY is not set; the overlay endpoints will reject every request");
        }

        let trusted_emails = parse_email_list(get("STATS_TRUSTED_EMAILS").as_deref().unwrap_or(""));
        if trusted_emails.is_empty() {
            warn!("STATS_TRUSTED_EMAILS is empty; no user will be granted the admin role");
        }

        let trusted_proxies = parse_ip_list(get("STATS_TRUSTED_PROXIES").as_deref().unwrap_or(""))?;

        let http_port = parse_or(get("STATS_HTTP_PORT"), "STATS_HTTP_PORT", 5000u16)?;
        let ttl_minutes = parse_or(get("TOKEN_TTL_MINUTES"), "TOKEN_TTL_MINUTES", DEFAULT_TOKEN_TTL_MINUTES)?;
        if ttl_minutes <= 0 {
            return Err(anyhow!("TOKEN_TTL_MINUTES must be positive"));
        }

        let storage = match get("STATS_STORAGE").as_deref() {
            Some("memory") => StorageBackend::Memory,
            Some("postgres") | None => StorageBackend::Postgres(postgres_settings(&get)?),
            Some(other) => return Err(anyhow!("unknown STATS_STORAGE '{}'", other)),
        };

        Ok(Self {
            http_port,
            storage,
            api_key,
            jwt_secret,
            obs_key,
            trusted_emails,
            token_ttl: chrono::Duration::minutes(ttl_minutes),
            trusted_proxies,
        })
    }
}

fn postgres_settings<G>(get: &G) -> Result<PostgresSettings>
where
    G: Fn(&str) -> Option<String>,
{
    let require = |key: &str| get(key).with_context(|| format!("{} must be set in environment or .env file", key));

    let max_connections = parse_or(get("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 5u32)?;
    let acquire_secs = parse_or(get("DB_ACQUIRE_TIMEOUT_SECS"), "DB_ACQUIRE_TIMEOUT_SECS", 5u64)?;
    let statement_ms = parse_or(get("DB_STATEMENT_TIMEOUT_MS"), "DB_STATEMENT_TIMEOUT_MS", 5000u64)?;

    Ok(PostgresSettings {
        host: require("STATS_DB_HOST")?,
        port: parse_or(get("STATS_DB_PORT"), "STATS_DB_PORT", 5432u16)?,
        user: require("STATS_DB_USER")?,
        password: require("STATS_DB_PASS")?,
        database: require("STATS_DB_NAME")?,
        max_connections: max_connections.max(1),
        acquire_timeout: Duration::from_secs(acquire_secs),
        statement_timeout: Duration::from_millis(statement_ms),
    })
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid {} value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

/// Splits a comma-separated email list, normalizing each entry.
pub fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|email| email.trim().to_ascii_lowercase())
        .filter(|email| !email.is_empty())
        .collect()
}

/// Splits a comma-separated list of IP addresses.
pub fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| {
            ip.parse()
                .map_err(|e| anyhow!("invalid STATS_TRUSTED_PROXIES entry '{}': {}", ip, e))
        })
        .collect()
}
