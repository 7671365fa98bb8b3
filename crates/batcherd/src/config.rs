//! Service configuration loaded from environment variables.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use batching::{BatchingOptions, ThresholdError, ThresholdTable};
use messaging::ConsumerOptions;
use thiserror::Error;

/// Prefix of the per-currency threshold variables, e.g. `THRESHOLD_USD`.
const THRESHOLD_PREFIX: &str = "THRESHOLD_";

/// Errors found while loading configuration. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Threshold(#[from] ThresholdError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// Service configuration.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:8085`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: PostgreSQL connection string; batches stay in memory without it
/// - `THRESHOLD_<CODE>`: dispatch threshold per currency (default `THRESHOLD_USD=100`)
/// - `STORE_TIMEOUT_SECS`, `CONFLICT_RETRIES`: engine bounds (default 30 and 3)
/// - `PREFETCH_COUNT`, `REQUEUE_DELAY_MS`: consumer tuning (default 10 and 500)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub thresholds: ThresholdTable,
    pub batching: BatchingOptions,
    pub consumer: ConsumerOptions,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Loads configuration from explicit `(name, value)` pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut thresholds: Vec<(&str, &str)> = vars
            .iter()
            .filter_map(|(k, v)| Some((k.strip_prefix(THRESHOLD_PREFIX)?, v.as_str())))
            .collect();
        if thresholds.is_empty() {
            thresholds.push(("USD", "100"));
        }

        Ok(Self {
            host: vars
                .get("HOST")
                .cloned()
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&vars, "PORT", 8085)?,
            log_level: vars
                .get("RUST_LOG")
                .cloned()
                .unwrap_or_else(|| "info".to_string()),
            log_format: parse(&vars, "LOG_FORMAT", LogFormat::Text)?,
            database_url: vars.get("DATABASE_URL").filter(|v| !v.is_empty()).cloned(),
            thresholds: ThresholdTable::from_pairs(thresholds)?,
            batching: BatchingOptions {
                store_timeout: Duration::from_secs(parse(&vars, "STORE_TIMEOUT_SECS", 30)?),
                conflict_retries: parse(&vars, "CONFLICT_RETRIES", 3)?,
            },
            consumer: ConsumerOptions {
                prefetch: parse(&vars, "PREFETCH_COUNT", 10)?,
                requeue_delay: Duration::from_millis(parse(&vars, "REQUEUE_DELAY_MS", 500)?),
            },
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match vars.get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        }),
    }
}
