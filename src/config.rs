use std::{fmt::Display, net::SocketAddr, str::FromStr};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

/// Used when `JWT_SECRET` is unset. Only acceptable for local development.
pub const FALLBACK_JWT_SECRET: &str = "fallback_secret";

/// Upper bound for `JWT_TTL_DAYS`, roughly ten years.
pub const MAX_JWT_TTL_DAYS: i64 = 3650;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub jwt: JwtConfig,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let secret = match std::env::var("JWT_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                warn!("JWT_SECRET not set; signing tokens with the built-in fallback secret");
                FALLBACK_JWT_SECRET.to_string()
            }
        };

        let jwt = JwtConfig {
            secret,
            ttl_days: check_ttl_days(parse_or("JWT_TTL_DAYS", 30)?)?,
        };

        Ok(Self {
            database_url,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            jwt,
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_or("APP_PORT", 5000)?,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn check_ttl_days(days: i64) -> anyhow::Result<i64> {
    if (1..=MAX_JWT_TTL_DAYS).contains(&days) {
        Ok(days)
    } else {
        anyhow::bail!("JWT_TTL_DAYS must be between 1 and {MAX_JWT_TTL_DAYS}, got {days}")
    }
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key} value {raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}
