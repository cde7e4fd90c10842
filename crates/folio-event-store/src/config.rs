//! Runtime configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use folio_core::store::DEFAULT_PAGE_SIZE;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS: &str = "FOLIO_MAX_CONNECTIONS";
pub const ACQUIRE_TIMEOUT_MS: &str = "FOLIO_ACQUIRE_TIMEOUT_MS";
pub const READ_PAGE_SIZE: &str = "FOLIO_READ_PAGE_SIZE";
pub const POLL_INTERVAL_MS: &str = "FOLIO_POLL_INTERVAL_MS";
pub const LOG_FORMAT: &str = "FOLIO_LOG_FORMAT";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    /// A variable is set to something unusable.
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Text,
    #[default]
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::Invalid {
                key: LOG_FORMAT,
                expected: "`text` or `json`",
                value: s.to_owned(),
            }),
        }
    }
}

/// Event store and projector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// PostgreSQL connection string. Only the PostgreSQL store needs it.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// How long a caller waits for a pooled connection.
    pub acquire_timeout: Duration,
    /// Events fetched per page while replaying or projecting.
    pub read_page_size: usize,
    /// Delay between projector polls.
    pub poll_interval: Duration,
    pub log_format: LogFormat,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            read_page_size: DEFAULT_PAGE_SIZE,
            poll_interval: Duration::from_millis(500),
            log_format: LogFormat::Json,
        }
    }
}

impl StoreConfig {
    /// Reads configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, falling back to defaults for
    /// unset variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            database_url: lookup(DATABASE_URL).filter(|url| !url.trim().is_empty()),
            max_connections: parse_or(&lookup, MAX_CONNECTIONS, "a positive integer", defaults.max_connections)?,
            acquire_timeout: Duration::from_millis(parse_or(
                &lookup,
                ACQUIRE_TIMEOUT_MS,
                "a number of milliseconds",
                millis(defaults.acquire_timeout),
            )?),
            read_page_size: parse_or(&lookup, READ_PAGE_SIZE, "a positive integer", defaults.read_page_size)?,
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                POLL_INTERVAL_MS,
                "a number of milliseconds",
                millis(defaults.poll_interval),
            )?),
            log_format: match lookup(LOG_FORMAT) {
                Some(value) => value.parse()?,
                None => defaults.log_format,
            },
        })
    }

    /// Returns the database URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if `DATABASE_URL` was not set.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing(DATABASE_URL))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(ConfigError::Invalid {
            key,
            expected,
            value,
        }),
    }
}
