//! Process configuration, read from the environment (and `.env`, if present).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rconq_core::MAX_EXPIRY_HOURS;
use thiserror::Error;

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_TTL_MS};

pub const DEFAULT_MASTER_TOKEN: &str = "change-me-to-a-secure-random-token";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub master_token: String,
    pub servers_file: PathBuf,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub command_expiry_hours: u32,
    pub cleanup_interval_minutes: u64,
    pub request_timeout_ms: u64,
    pub pending_cache_ttl_ms: u64,
    pub pending_cache_capacity: usize,
    pub max_bulk_commands: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            master_token: DEFAULT_MASTER_TOKEN.to_string(),
            servers_file: PathBuf::from("servers.json"),
            database_url: None,
            db_max_connections: 20,
            command_expiry_hours: 24,
            cleanup_interval_minutes: 5,
            request_timeout_ms: 15_000,
            pending_cache_ttl_ms: DEFAULT_TTL_MS,
            pending_cache_capacity: DEFAULT_CAPACITY,
            max_bulk_commands: 500,
        }
    }
}

impl Config {
    /// Load `.env` (if any), then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                tracing::warn!(error = %err, "failed to load .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys use defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let bind_addr = match (get("BIND_ADDR"), get("PORT")) {
            (Some(addr), _) => addr,
            (None, Some(port)) => format!("0.0.0.0:{}", parse::<u16>("PORT", port)?),
            (None, None) => defaults.bind_addr,
        };

        let command_expiry_hours =
            parse_or(&get, "COMMAND_EXPIRY_HOURS", defaults.command_expiry_hours)?;
        if command_expiry_hours > MAX_EXPIRY_HOURS {
            return Err(ConfigError::Invalid {
                key: "COMMAND_EXPIRY_HOURS",
                value: command_expiry_hours.to_string(),
                reason: format!("must be at most {MAX_EXPIRY_HOURS}"),
            });
        }

        Ok(Self {
            bind_addr,
            master_token: get("MASTER_TOKEN").unwrap_or(defaults.master_token),
            servers_file: get("SERVERS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.servers_file),
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            command_expiry_hours,
            cleanup_interval_minutes: parse_or(
                &get,
                "CLEANUP_INTERVAL_MINUTES",
                defaults.cleanup_interval_minutes,
            )?,
            request_timeout_ms: parse_or(&get, "REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
            pending_cache_ttl_ms: parse_or(&get, "PENDING_CACHE_TTL_MS", defaults.pending_cache_ttl_ms)?,
            pending_cache_capacity: parse_or(
                &get,
                "PENDING_CACHE_CAPACITY",
                defaults.pending_cache_capacity,
            )?,
            max_bulk_commands: parse_or(&get, "MAX_BULK_COMMANDS", defaults.max_bulk_commands)?,
        })
    }

    pub fn uses_default_master_token(&self) -> bool {
        self.master_token == DEFAULT_MASTER_TOKEN
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes.max(1) * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key).map_or(Ok(default), |v| parse(key, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.uses_default_master_token());
        assert_eq!(config.cleanup_interval(), Duration::from_secs(300));
    }

    #[test]
    fn port_is_honoured_without_bind_addr() {
        assert_eq!(from(&[("PORT", "8080")]).unwrap().bind_addr, "0.0.0.0:8080");
        assert_eq!(
            from(&[("PORT", "8080"), ("BIND_ADDR", "127.0.0.1:9000")])
                .unwrap()
                .bind_addr,
            "127.0.0.1:9000"
        );
    }

    #[test]
    fn overrides_and_blank_values() {
        let config = from(&[
            ("MASTER_TOKEN", "s3cret"),
            ("DATABASE_URL", "postgres://localhost/rconq"),
            ("COMMAND_EXPIRY_HOURS", "0"),
            ("PENDING_CACHE_TTL_MS", " 250 "),
            ("MAX_BULK_COMMANDS", ""),
        ])
        .unwrap();
        assert_eq!(config.master_token, "s3cret");
        assert!(!config.uses_default_master_token());
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/rconq"));
        assert_eq!(config.command_expiry_hours, 0);
        assert_eq!(config.pending_cache_ttl_ms, 250);
        assert_eq!(config.max_bulk_commands, 500);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let err = from(&[("CLEANUP_INTERVAL_MINUTES", "five")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "CLEANUP_INTERVAL_MINUTES",
                ..
            }
        ));
    }

    #[test]
    fn default_expiry_is_bounded() {
        let err = from(&[("COMMAND_EXPIRY_HOURS", "4294967295")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "COMMAND_EXPIRY_HOURS",
                ..
            }
        ));
    }
}
