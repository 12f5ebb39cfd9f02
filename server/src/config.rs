//! Server configuration module.
//!
//! This module provides configuration loading for the simple-bank server
//! from environment variables.
//!
//! # Environment Variables
//!
//! - `SIMPLE_BANK_TOKEN_SYMMETRIC_KEY`: Token key (required; 32 bytes for
//!   sealed tokens, at least 32 for JWT)
//! - `SIMPLE_BANK_TOKEN_SCHEME`: `sealed` or `jwt` (default: `sealed`)
//! - `SIMPLE_BANK_ACCESS_TOKEN_DURATION`: Access token lifetime (default: `15m`)
//! - `SIMPLE_BANK_REFRESH_TOKEN_DURATION`: Refresh token lifetime (default: `24h`)
//! - `SIMPLE_BANK_DATA_DIRECTORY`: Directory for `bank.wal` and `queue.wal` (default: `./data`)
//! - `SIMPLE_BANK_DB_POOL_SIZE`: Concurrent units of work (default: `10`)
//! - `SIMPLE_BANK_DB_POOL_TIMEOUT`: Wait for a pool slot (default: `5s`)
//! - `SIMPLE_BANK_TX_MAX_RETRIES`: Retries after a serialization conflict (default: `3`)
//! - `SIMPLE_BANK_WORKER_CONCURRENCY`: Concurrent task handlers (default: `10`)
//! - `SIMPLE_BANK_TASK_LEASE_DURATION`: Task visibility timeout (default: `30s`)
//! - `SIMPLE_BANK_RELAY_INTERVAL`: Outbox relay period (default: `1s`)
//!
//! Durations are an integer followed by `ms`, `s`, `m` or `h`.
//!
//! # Invariants
//!
//! - Durations and sizes are strictly positive.
//! - The token key satisfies the chosen scheme's length rule.

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;

use crate::db::StoreConfig;
use crate::session::SessionConfig;
use crate::token::TokenScheme;

const PREFIX: &str = "SIMPLE_BANK_";

/// Server configuration.
///
/// # Pre-conditions
///
/// When constructed via `from_env()`:
/// - All required environment variables must be set
/// - All values must be valid for their respective types
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Symmetric key for minting and verifying tokens.
    pub token_symmetric_key: String,
    pub token_scheme: TokenScheme,
    pub access_token_duration: TimeDelta,
    pub refresh_token_duration: TimeDelta,
    /// Holds the bank and queue write-ahead logs.
    pub data_directory: PathBuf,
    pub db_pool_size: usize,
    pub db_pool_timeout: Duration,
    pub tx_max_retries: u32,
    pub worker_concurrency: usize,
    pub task_lease_duration: TimeDelta,
    pub relay_interval: Duration,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";
    /// Bank database log file name.
    pub const BANK_WAL: &'static str = "bank.wal";
    /// Task queue log file name.
    pub const QUEUE_WAL: &'static str = "queue.wal";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the token key is missing or any value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a full variable name
    /// to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };

        let token_scheme = vars
            .parse("TOKEN_SCHEME", "sealed", str::parse::<TokenScheme>)?;
        let token_symmetric_key = vars.required("TOKEN_SYMMETRIC_KEY")?;
        Self::check_key(token_scheme, &token_symmetric_key)?;

        Ok(Self {
            token_symmetric_key,
            token_scheme,
            access_token_duration: vars.time_delta("ACCESS_TOKEN_DURATION", "15m")?,
            refresh_token_duration: vars.time_delta("REFRESH_TOKEN_DURATION", "24h")?,
            data_directory: PathBuf::from(
                vars.get("DATA_DIRECTORY")
                    .unwrap_or_else(|| Self::DEFAULT_DATA_DIRECTORY.to_string()),
            ),
            db_pool_size: vars.positive("DB_POOL_SIZE", "10")?,
            db_pool_timeout: vars.parse("DB_POOL_TIMEOUT", "5s", parse_duration)?,
            tx_max_retries: vars.parse("TX_MAX_RETRIES", "3", |v| {
                v.parse::<u32>().map_err(|e| e.to_string())
            })?,
            worker_concurrency: vars.positive("WORKER_CONCURRENCY", "10")?,
            task_lease_duration: vars.time_delta("TASK_LEASE_DURATION", "30s")?,
            relay_interval: vars.parse("RELAY_INTERVAL", "1s", parse_duration)?,
        })
    }

    fn check_key(scheme: TokenScheme, key: &str) -> Result<(), ConfigError> {
        let len = key.len();
        let message = match scheme {
            TokenScheme::Sealed if len != 32 => format!("must be exactly 32 bytes, got {len}"),
            TokenScheme::Jwt if len < 32 => format!("must be at least 32 bytes, got {len}"),
            _ => return Ok(()),
        };
        Err(ConfigError::InvalidValue {
            name: format!("{PREFIX}TOKEN_SYMMETRIC_KEY"),
            message,
        })
    }

    #[must_use]
    pub fn bank_wal_path(&self) -> PathBuf {
        self.data_directory.join(Self::BANK_WAL)
    }

    #[must_use]
    pub fn queue_wal_path(&self) -> PathBuf {
        self.data_directory.join(Self::QUEUE_WAL)
    }

    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        StoreConfig {
            pool_size: self.db_pool_size,
            pool_timeout: self.db_pool_timeout,
            tx_max_retries: self.tx_max_retries,
        }
    }

    #[must_use]
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig {
            access_token_duration: self.access_token_duration,
            refresh_token_duration: self.refresh_token_duration,
        }
    }
}

/// Prefixed variable access.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{name}"))
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        let value = self
            .get(name)
            .ok_or_else(|| ConfigError::MissingEnvVar(format!("{PREFIX}{name}")))?;
        if value.is_empty() {
            return Err(invalid(name, "must not be empty".to_string()));
        }
        Ok(value)
    }

    fn parse<T>(
        &self,
        name: &str,
        default: &str,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<T, ConfigError> {
        let value = self.get(name).unwrap_or_else(|| default.to_string());
        parse(&value).map_err(|message| invalid(name, format!("'{value}': {message}")))
    }

    fn positive(&self, name: &str, default: &str) -> Result<usize, ConfigError> {
        self.parse(name, default, |v| match v.parse::<usize>() {
            Ok(0) => Err("must be greater than zero".to_string()),
            Ok(n) => Ok(n),
            Err(e) => Err(e.to_string()),
        })
    }

    fn time_delta(&self, name: &str, default: &str) -> Result<TimeDelta, ConfigError> {
        self.parse(name, default, |v| {
            TimeDelta::from_std(parse_duration(v)?).map_err(|e| e.to_string())
        })
    }
}

fn invalid(name: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: format!("{PREFIX}{name}"),
        message,
    }
}

/// Parse a duration such as `500ms`, `30s`, `15m` or `24h`.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| "missing unit (ms, s, m or h)".to_string())?;
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| "expected a whole number followed by a unit".to_string())?;
    let duration = match unit {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        other => return Err(format!("unknown unit '{other}'")),
    };
    if duration.is_zero() {
        return Err("must be greater than zero".to_string());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{PREFIX}{k}"), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[("TOKEN_SYMMETRIC_KEY", KEY)]).expect("load");
        assert_eq!(config.token_scheme, TokenScheme::Sealed);
        assert_eq!(config.access_token_duration, TimeDelta::minutes(15));
        assert_eq!(config.refresh_token_duration, TimeDelta::hours(24));
        assert_eq!(config.data_directory, PathBuf::from("./data"));
        assert_eq!(config.bank_wal_path(), PathBuf::from("./data/bank.wal"));
        assert_eq!(config.db_pool_size, 10);
        assert_eq!(config.db_pool_timeout, Duration::from_secs(5));
        assert_eq!(config.tx_max_retries, 3);
        assert_eq!(config.worker_concurrency, 10);
        assert_eq!(config.task_lease_duration, TimeDelta::seconds(30));
        assert_eq!(config.relay_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TOKEN_SYMMETRIC_KEY", "a-much-longer-jwt-secret-of-40-bytes-xxx"),
            ("TOKEN_SCHEME", "jwt"),
            ("ACCESS_TOKEN_DURATION", "5m"),
            ("DATA_DIRECTORY", "/var/lib/bank"),
            ("DB_POOL_TIMEOUT", "250ms"),
        ])
        .expect("load");
        assert_eq!(config.token_scheme, TokenScheme::Jwt);
        assert_eq!(config.access_token_duration, TimeDelta::minutes(5));
        assert_eq!(config.queue_wal_path(), PathBuf::from("/var/lib/bank/queue.wal"));
        assert_eq!(config.db_pool_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_key() {
        assert_eq!(
            load(&[]).expect_err("missing"),
            ConfigError::MissingEnvVar("SIMPLE_BANK_TOKEN_SYMMETRIC_KEY".to_string())
        );
    }

    #[test]
    fn test_key_length_rules() {
        let err = load(&[("TOKEN_SYMMETRIC_KEY", "short")]).expect_err("short key");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let long = "x".repeat(40);
        assert!(load(&[("TOKEN_SYMMETRIC_KEY", &long)]).is_err());
        assert!(load(&[("TOKEN_SYMMETRIC_KEY", &long), ("TOKEN_SCHEME", "jwt")]).is_ok());
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            ("DB_POOL_SIZE", "0"),
            ("DB_POOL_SIZE", "many"),
            ("ACCESS_TOKEN_DURATION", "15"),
            ("ACCESS_TOKEN_DURATION", "15d"),
            ("RELAY_INTERVAL", "0s"),
            ("TOKEN_SCHEME", "paseto"),
        ] {
            let err = load(&[("TOKEN_SYMMETRIC_KEY", KEY), (name, value)])
                .expect_err("invalid value");
            assert!(
                matches!(&err, ConfigError::InvalidValue { name: n, .. } if n == &format!("{PREFIX}{name}")),
                "unexpected error for {name}={value}: {err}"
            );
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("15m"), Ok(Duration::from_secs(900)));
        assert_eq!(parse_duration("24h"), Ok(Duration::from_secs(86_400)));
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_config_error_display_missing() {
        let error = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert_eq!(
            error.to_string(),
            "missing required environment variable: TEST_VAR"
        );
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
