//! Configuration module for the log stager service.
//!
//! This module provides environment-based configuration for the staging
//! pipeline: admin API URL, drain batch size and poll interval, worker
//! concurrency, and the queue retry policy.

use std::env;
use std::time::Duration;

/// Default admin application API URL
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default drain batch size (raw lines per cycle)
const DEFAULT_BATCH_SIZE: usize = 100;

/// Default drain poll interval in seconds
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default ceiling for the drainer's error backoff in seconds
const DEFAULT_MAX_POLL_INTERVAL_SECS: u64 = 60;

/// Default number of concurrent worker executors
const DEFAULT_WORKER_CONCURRENCY: usize = 32;

/// Maximum allowed batch size to prevent memory issues
const MAX_BATCH_SIZE: usize = 10_000;

/// Minimum poll interval to prevent hammering the buffer
const MIN_POLL_INTERVAL_SECS: u64 = 1;

/// Maximum poll interval to ensure reasonable data freshness
const MAX_POLL_INTERVAL_SECS: u64 = 300;

/// Maximum worker concurrency
const MAX_WORKER_CONCURRENCY: usize = 1_024;

/// Configuration for the log stager service.
///
/// All settings can be configured via environment variables:
/// - `LOG_STAGER_API_URL`: admin API URL (default: http://localhost:8000)
/// - `LOG_STAGER_BATCH_SIZE`: raw lines per drain cycle (default: 100)
/// - `LOG_STAGER_POLL_INTERVAL_SECS`: seconds between drain cycles (default: 5)
/// - `LOG_STAGER_MAX_POLL_INTERVAL_SECS`: drain backoff ceiling (default: 60)
/// - `LOG_STAGER_WORKER_CONCURRENCY`: concurrent executors (default: 32)
/// - `LOG_STAGER_MAX_ATTEMPTS`: job delivery attempts (default: 3)
/// - `LOG_STAGER_RETRY_BASE_DELAY_MS`: retry backoff base (default: 500)
/// - `LOG_STAGER_MIN_MESSAGE_LEN`: validation floor for messages (default: 1)
/// - `LOG_STAGER_KEEP_COMPLETED`: completed-job retention (default: 1000)
/// - `LOG_STAGER_KEEP_FAILED`: dead-letter retention (default: 5000)
/// - `LOG_STAGER_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
/// - `LOG_STAGER_SYNTHETIC_PRODUCER`: feed synthetic lines (default: true)
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL for the admin application API
    pub api_url: String,

    /// Number of raw lines peeked per drain cycle
    pub batch_size: usize,

    /// Fixed delay between error-free drain cycles
    pub poll_interval: Duration,

    /// Ceiling for the drainer's error backoff
    pub max_poll_interval: Duration,

    /// Number of concurrent worker executors
    pub worker_concurrency: usize,

    /// Delivery attempts per job before dead-lettering
    pub max_attempts: u32,

    /// Base delay for the queue's retry backoff
    pub retry_base_delay: Duration,

    /// Minimum accepted message length
    pub min_message_len: usize,

    /// Completed-job records retained by the queue
    pub keep_completed: usize,

    /// Dead-lettered jobs retained by the queue
    pub keep_failed: usize,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Whether to run the synthetic line producer
    pub synthetic_producer: bool,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Returns a new `Config` instance with values from environment
    /// variables, falling back to sensible defaults where appropriate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a numeric variable does not parse or falls
    /// outside its allowed range, or if the backoff ceiling is below the
    /// poll interval.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url =
            env::var("LOG_STAGER_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_url = api_url.trim_end_matches('/').to_string();

        let batch_size = Self::parse_batch_size()?;
        let poll_interval_secs = Self::parse_poll_interval()?;
        let poll_interval = Duration::from_secs(poll_interval_secs);

        let max_poll_interval_secs: u64 = env::var("LOG_STAGER_MAX_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_POLL_INTERVAL_SECS);
        if max_poll_interval_secs < poll_interval_secs {
            return Err(ConfigError {
                message: format!(
                    "backoff ceiling {}s is below the poll interval ({}s)",
                    max_poll_interval_secs, poll_interval_secs
                ),
                env_var: Some("LOG_STAGER_MAX_POLL_INTERVAL_SECS".to_string()),
            });
        }
        let max_poll_interval = Duration::from_secs(max_poll_interval_secs);

        let worker_concurrency = Self::parse_worker_concurrency()?;

        let max_attempts: u32 = env::var("LOG_STAGER_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v >= 1)
            .unwrap_or(3);

        let retry_base_delay_ms: u64 = env::var("LOG_STAGER_RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);
        let retry_base_delay = Duration::from_millis(retry_base_delay_ms);

        let min_message_len: usize = env::var("LOG_STAGER_MIN_MESSAGE_LEN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let keep_completed: usize = env::var("LOG_STAGER_KEEP_COMPLETED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_000);

        let keep_failed: usize = env::var("LOG_STAGER_KEEP_FAILED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000);

        let request_timeout_secs: u64 = env::var("LOG_STAGER_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let request_timeout = Duration::from_secs(request_timeout_secs);

        let synthetic_producer = env::var("LOG_STAGER_SYNTHETIC_PRODUCER")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        Ok(Self {
            api_url,
            batch_size,
            poll_interval,
            max_poll_interval,
            worker_concurrency,
            max_attempts,
            retry_base_delay,
            min_message_len,
            keep_completed,
            keep_failed,
            request_timeout,
            synthetic_producer,
        })
    }

    /// Parse batch size from environment variable with validation.
    fn parse_batch_size() -> Result<usize, ConfigError> {
        let env_var = "LOG_STAGER_BATCH_SIZE";

        match env::var(env_var) {
            Ok(value) => {
                let batch_size: usize = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if batch_size == 0 {
                    return Err(ConfigError {
                        message: "batch size must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if batch_size > MAX_BATCH_SIZE {
                    return Err(ConfigError {
                        message: format!(
                            "batch size {} exceeds maximum allowed ({})",
                            batch_size, MAX_BATCH_SIZE
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(batch_size)
            }
            Err(_) => Ok(DEFAULT_BATCH_SIZE),
        }
    }

    /// Parse poll interval from environment variable with validation.
    fn parse_poll_interval() -> Result<u64, ConfigError> {
        let env_var = "LOG_STAGER_POLL_INTERVAL_SECS";

        match env::var(env_var) {
            Ok(value) => {
                let interval: u64 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if interval < MIN_POLL_INTERVAL_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "poll interval {} is below minimum ({}s)",
                            interval, MIN_POLL_INTERVAL_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if interval > MAX_POLL_INTERVAL_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "poll interval {} exceeds maximum ({}s)",
                            interval, MAX_POLL_INTERVAL_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(interval)
            }
            Err(_) => Ok(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    /// Parse worker concurrency from environment variable with validation.
    fn parse_worker_concurrency() -> Result<usize, ConfigError> {
        let env_var = "LOG_STAGER_WORKER_CONCURRENCY";

        match env::var(env_var) {
            Ok(value) => {
                let concurrency: usize = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if concurrency == 0 {
                    return Err(ConfigError {
                        message: "worker concurrency must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if concurrency > MAX_WORKER_CONCURRENCY {
                    return Err(ConfigError {
                        message: format!(
                            "worker concurrency {} exceeds maximum allowed ({})",
                            concurrency, MAX_WORKER_CONCURRENCY
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(concurrency)
            }
            Err(_) => Ok(DEFAULT_WORKER_CONCURRENCY),
        }
    }
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_poll_interval: Duration::from_secs(DEFAULT_MAX_POLL_INTERVAL_SECS),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            min_message_len: 1,
            keep_completed: 1_000,
            keep_failed: 5_000,
            request_timeout: Duration::from_secs(30),
            synthetic_producer: true,
        }
    }
}
