//! Broker configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `BROKER_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `BROKER_HOST` - Bind address (default: 127.0.0.1)
//! - `BROKER_PORT` - Listen port (default: 8081)
//! - `KAFKA_BROKERS` - Bootstrap servers (default: localhost:9092)
//! - `KAFKA_TOPIC` - Order topic (default: orders)
//! - `KAFKA_PARTITION` - Partition consumed by this process (default: 0)
//! - `KAFKA_GROUP_ID` - Group under which offsets are committed (default: order-broker)
//! - `INTAKE_READ_TIMEOUT_SECS` - Bounded wait for one stream read (default: 10)
//! - `INTAKE_RETRY_BACKOFF_MS` - Sleep after a failed read or persist (default: 1000)
//! - `INTAKE_WRITE_TIMEOUT_SECS` - Timeout for one transactional insert (default: 5)
//! - `INTAKE_SKIP_UNPROCESSABLE` - Acknowledge undecodable/invalid messages (default: false)
//! - `BOOTSTRAP_TIMEOUT_SECS` - Timeout for the startup cache warm (default: 10)
//! - `QUERY_STORE_TIMEOUT_SECS` - Timeout for the read-through store fetch (default: 5)
//! - `SHUTDOWN_DRAIN_SECS` - Bound on draining work after a shutdown signal (default: 30)
//! - `LOG_FORMAT` - `json` for structured log lines, anything else for text
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Transaction sample rate (default: 0.1)

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Broker application configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Kafka connection and subscription
    pub kafka: KafkaConfig,
    /// Intake loop timing and poison-message policy
    pub intake: IntakeConfig,
    /// Timeout for loading every order into the cache at startup
    pub bootstrap_timeout: Duration,
    /// Timeout for the store fetch on a cache miss
    pub query_timeout: Duration,
    /// How long to wait for the server and consumer to drain on shutdown
    pub shutdown_drain: Duration,
    /// Emit JSON log lines instead of text
    pub log_json: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate
    pub sentry_sample_rate: f32,
    /// Sentry transaction sample rate
    pub sentry_traces_sample_rate: f32,
}

/// Kafka subscription settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Topic carrying order JSON
    pub topic: String,
    /// The single partition this process reads
    pub partition: i32,
    /// Consumer group used only for offset storage (partition is assigned manually)
    pub group_id: String,
}

/// Intake loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeConfig {
    pub read_timeout: Duration,
    pub retry_backoff: Duration,
    pub write_timeout: Duration,
    /// When set, messages that can never be processed (bad JSON, missing
    /// `order_uid`) are acknowledged after a warning instead of holding the
    /// committed offset back.
    pub skip_unprocessable: bool,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(1000),
            write_timeout: Duration::from_secs(5),
            skip_unprocessable: false,
        }
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or any value
    /// fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = get_database_url(env, "BROKER_DATABASE_URL")?;
        let host = get_parsed_or_default(env, "BROKER_HOST", "127.0.0.1")?;
        let port = get_parsed_or_default(env, "BROKER_PORT", "8081")?;

        let kafka = KafkaConfig {
            brokers: get_env_or_default(env, "KAFKA_BROKERS", "localhost:9092"),
            topic: get_env_or_default(env, "KAFKA_TOPIC", "orders"),
            partition: get_parsed_or_default(env, "KAFKA_PARTITION", "0")?,
            group_id: get_env_or_default(env, "KAFKA_GROUP_ID", "order-broker"),
        };

        let intake = IntakeConfig {
            read_timeout: Duration::from_secs(get_parsed_or_default(
                env,
                "INTAKE_READ_TIMEOUT_SECS",
                "10",
            )?),
            retry_backoff: Duration::from_millis(get_parsed_or_default(
                env,
                "INTAKE_RETRY_BACKOFF_MS",
                "1000",
            )?),
            write_timeout: Duration::from_secs(get_parsed_or_default(
                env,
                "INTAKE_WRITE_TIMEOUT_SECS",
                "5",
            )?),
            skip_unprocessable: get_parsed_or_default(env, "INTAKE_SKIP_UNPROCESSABLE", "false")?,
        };

        let bootstrap_timeout =
            Duration::from_secs(get_parsed_or_default(env, "BOOTSTRAP_TIMEOUT_SECS", "10")?);
        let query_timeout =
            Duration::from_secs(get_parsed_or_default(env, "QUERY_STORE_TIMEOUT_SECS", "5")?);
        let shutdown_drain =
            Duration::from_secs(get_parsed_or_default(env, "SHUTDOWN_DRAIN_SECS", "30")?);

        let log_json = env("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

        let sentry_dsn = env("SENTRY_DSN");
        let sentry_environment = env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);

        Ok(Self {
            database_url,
            host,
            port,
            kafka,
            intake,
            bootstrap_timeout,
            query_timeout,
            shutdown_drain,
            log_json,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(
    env: &dyn Fn(&str) -> Option<String>,
    primary_key: &str,
) -> Result<SecretString, ConfigError> {
    env(primary_key)
        .or_else(|| env("DATABASE_URL"))
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an environment variable with a default value.
fn get_env_or_default(env: &dyn Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    env(key).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable (or its default) parsed into `T`.
fn get_parsed_or_default<T>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(env, key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}
