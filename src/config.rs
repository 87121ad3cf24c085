use anyhow::{bail, Context};
use serde::Deserialize;

/// Which strategy seals passwords before they reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordSchemeKind {
    Plain,
    Argon2,
}

impl std::str::FromStr for PasswordSchemeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "argon2" => Ok(Self::Argon2),
            other => bail!("unknown password scheme {other:?}, expected plain or argon2"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub host: String,
    pub port: u16,
    /// Mount point for the account routes; empty means the root.
    pub route_prefix: String,
    /// Capability flag for the `role` field.
    pub roles_enabled: bool,
    pub password_scheme: PasswordSchemeKind,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is not set")?;

        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(v) => v
                .parse::<u32>()
                .with_context(|| format!("DB_MAX_CONNECTIONS={v:?} is not a number"))?,
            None => 10,
        };

        let host = lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("APP_PORT") {
            Some(v) => v
                .parse::<u16>()
                .with_context(|| format!("APP_PORT={v:?} is not a valid port"))?,
            None => 8080,
        };

        let route_prefix = normalize_prefix(&lookup("ROUTE_PREFIX").unwrap_or_default())?;

        let roles_enabled = match lookup("ROLES_ENABLED") {
            Some(v) => parse_flag(&v).with_context(|| format!("ROLES_ENABLED={v:?}"))?,
            None => true,
        };

        let password_scheme = match lookup("PASSWORD_SCHEME") {
            Some(v) => v.parse::<PasswordSchemeKind>()?,
            None => PasswordSchemeKind::Plain,
        };

        Ok(Self {
            database_url,
            max_connections,
            host,
            port,
            route_prefix,
            roles_enabled,
            password_scheme,
        })
    }
}

fn normalize_prefix(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if !trimmed.starts_with('/') {
        bail!("ROUTE_PREFIX must start with '/', got {raw:?}");
    }
    Ok(trimmed.to_string())
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("expected a boolean flag"),
    }
}
