use mirror_common::error::{MirrorError, MirrorResult};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub primary_database_url: String,
    pub replica_database_url: String,
    pub pool: PoolSettings,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

/// Limits shared by the primary and replica pools.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime_secs: u64,
    pub connect_attempts: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: 25,
            max_idle: 10,
            max_lifetime_secs: 300,
            connect_attempts: 5,
        }
    }
}

impl PoolSettings {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> MirrorResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let primary_database_url = get_var("DATABASE_URL")?;
        let replica_database_url =
            env::var("REPLICA_DATABASE_URL").unwrap_or_else(|_| primary_database_url.clone());

        let defaults = PoolSettings::default();
        let pool = PoolSettings {
            max_open: parse_var_or("DB_MAX_OPEN_CONNS", defaults.max_open)?,
            max_idle: parse_var_or("DB_MAX_IDLE_CONNS", defaults.max_idle)?,
            max_lifetime_secs: parse_var_or("DB_CONN_MAX_LIFETIME_SECS", defaults.max_lifetime_secs)?,
            connect_attempts: parse_var_or("DB_CONNECT_ATTEMPTS", defaults.connect_attempts)?,
        };
        if pool.max_idle > pool.max_open {
            return Err(MirrorError::Config(format!(
                "DB_MAX_IDLE_CONNS ({}) must not exceed DB_MAX_OPEN_CONNS ({})",
                pool.max_idle, pool.max_open
            )));
        }

        Ok(Self {
            primary_database_url,
            replica_database_url,
            pool,
            host: get_var_or("HOST", "0.0.0.0"),
            port: parse_var_or("PORT", 8080)?,
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection parameters for deployments that hand out parts instead of a URL.
#[derive(Debug, Clone, Deserialize)]
pub struct DbSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub sslmode: Option<String>,
}

impl DbSettings {
    pub fn connection_url(&self) -> String {
        let sslmode = self.sslmode.as_deref().unwrap_or("disable");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, sslmode
        )
    }
}

pub fn get_var(key: &str) -> MirrorResult<String> {
    env::var(key).map_err(|_| MirrorError::Config(format!("{key} is required but not set")))
}

pub fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an optional variable, failing on a present-but-malformed value.
pub fn parse_var_or<T>(key: &str, default: T) -> MirrorResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| MirrorError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
