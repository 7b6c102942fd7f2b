//! Configuration module for the climate logger.
//!
//! This module provides environment-based configuration: broker endpoint and
//! credentials, topics, transport limits, loop pacing and clock settings.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::channel::Credentials;
use crate::payload::DEFAULT_MAX_PAYLOAD_BYTES;

/// Default MQTT broker host
const DEFAULT_MQTT_HOST: &str = "mqtt.netpie.io";

/// Default MQTT broker port
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default topic for change-triggered single readings
const DEFAULT_TOPIC_SINGLE: &str = "@shadow/data/update";

/// Default topic for replayed batches
const DEFAULT_TOPIC_BATCH: &str = "@shadow/batch/update";

/// Default loop interval in milliseconds
const DEFAULT_LOOP_INTERVAL_MS: u64 = 1000;

/// Minimum loop interval to keep the sensor within its sampling rate
const MIN_LOOP_INTERVAL_MS: u64 = 100;

/// Maximum loop interval to keep readings reasonably fresh
const MAX_LOOP_INTERVAL_MS: u64 = 60_000;

/// Smallest transport buffer that can hold a single reading
const MIN_PAYLOAD_BYTES: usize = 128;

/// Largest payload MQTT can carry
const MAX_PAYLOAD_BYTES: usize = 268_435_455;

/// Default seconds between clock syncs
const DEFAULT_CLOCK_UPDATE_INTERVAL_SECS: u64 = 3600;

/// Default simulated sensor failure rate
const DEFAULT_SENSOR_FAILURE_RATE: f64 = 0.02;

/// Configuration for the climate logger.
///
/// All settings can be configured via `CLIMATE_LOGGER_*` environment variables;
/// see [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    /// MQTT broker host name
    pub mqtt_host: String,

    /// MQTT broker port
    pub mqtt_port: u16,

    /// Identity presented to the broker on connect
    pub credentials: Credentials,

    /// Topic for single change-triggered readings
    pub topic_single: String,

    /// Topic for batches of replayed readings
    pub topic_batch: String,

    /// Largest encoded document the transport buffer accepts
    pub max_payload_bytes: usize,

    /// Duration of one loop tick
    pub loop_interval: Duration,

    /// Minimum duration between two clock syncs
    pub clock_update_interval: Duration,

    /// Offset added to synced time, in seconds
    pub clock_offset_secs: i64,

    /// Retry buffer capacity; `None` keeps every undelivered reading
    pub buffer_capacity: Option<usize>,

    /// Time allowed for the broker to answer CONNECT
    pub connect_timeout: Duration,

    /// Time allowed for the broker to acknowledge a publish
    pub publish_timeout: Duration,

    /// MQTT keep-alive interval
    pub keep_alive: Duration,

    /// Failure probability of the simulated sensor
    pub sensor_failure_rate: f64,
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

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

/// Client id used when none is configured.
fn generated_client_id() -> String {
    format!("climate-logger-{}", Uuid::new_v4().simple())
}

/// Read and parse an optional variable; unset or empty yields `None`.
fn parse_var<T: FromStr>(env_var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid number", value))),
        _ => Ok(None),
    }
}

fn string_var(env_var: &str) -> Option<String> {
    env::var(env_var).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `CLIMATE_LOGGER_MQTT_HOST` / `CLIMATE_LOGGER_MQTT_PORT`: broker (default mqtt.netpie.io:1883)
    /// - `CLIMATE_LOGGER_MQTT_CLIENT_ID`: client id (default: generated)
    /// - `CLIMATE_LOGGER_MQTT_USERNAME` / `CLIMATE_LOGGER_MQTT_PASSWORD`: login (default: none)
    /// - `CLIMATE_LOGGER_TOPIC_SINGLE` / `CLIMATE_LOGGER_TOPIC_BATCH`: topics
    /// - `CLIMATE_LOGGER_MAX_PAYLOAD_BYTES`: transport buffer (default 16383)
    /// - `CLIMATE_LOGGER_LOOP_INTERVAL_MS`: tick duration (default 1000)
    /// - `CLIMATE_LOGGER_CLOCK_UPDATE_INTERVAL_SECS`: clock resync interval (default 3600)
    /// - `CLIMATE_LOGGER_CLOCK_OFFSET_SECS`: offset added to synced time (default 0)
    /// - `CLIMATE_LOGGER_BUFFER_CAPACITY`: retry buffer cap (default: unbounded)
    /// - `CLIMATE_LOGGER_CONNECT_TIMEOUT_SECS` / `CLIMATE_LOGGER_PUBLISH_TIMEOUT_SECS` (default 5)
    /// - `CLIMATE_LOGGER_KEEP_ALIVE_SECS` (default 15)
    /// - `CLIMATE_LOGGER_SENSOR_FAILURE_RATE`: simulated sensor (default 0.02)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is not a valid number or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mqtt_host = string_var("CLIMATE_LOGGER_MQTT_HOST").unwrap_or(defaults.mqtt_host);
        let mqtt_port = parse_var("CLIMATE_LOGGER_MQTT_PORT")?.unwrap_or(DEFAULT_MQTT_PORT);

        let client_id =
            string_var("CLIMATE_LOGGER_MQTT_CLIENT_ID").unwrap_or(defaults.credentials.client_id);
        if client_id.starts_with(' ') {
            return Err(ConfigError::for_var(
                "CLIMATE_LOGGER_MQTT_CLIENT_ID",
                "client id must not start with a space",
            ));
        }
        let mut credentials = Credentials::new(client_id);
        if let Some(username) = string_var("CLIMATE_LOGGER_MQTT_USERNAME") {
            let password = env::var("CLIMATE_LOGGER_MQTT_PASSWORD").unwrap_or_default();
            credentials = credentials.with_login(username, password);
        }

        let topic_single =
            string_var("CLIMATE_LOGGER_TOPIC_SINGLE").unwrap_or(defaults.topic_single);
        let topic_batch = string_var("CLIMATE_LOGGER_TOPIC_BATCH").unwrap_or(defaults.topic_batch);

        let max_payload_bytes = Self::parse_max_payload_bytes()?;
        let loop_interval = Duration::from_millis(Self::parse_loop_interval()?);

        let clock_update_interval = Duration::from_secs(
            parse_var("CLIMATE_LOGGER_CLOCK_UPDATE_INTERVAL_SECS")?
                .unwrap_or(DEFAULT_CLOCK_UPDATE_INTERVAL_SECS),
        );
        let clock_offset_secs: i64 = parse_var("CLIMATE_LOGGER_CLOCK_OFFSET_SECS")?.unwrap_or(0);

        let buffer_capacity = Self::parse_buffer_capacity()?;

        let connect_timeout = Self::parse_secs("CLIMATE_LOGGER_CONNECT_TIMEOUT_SECS", 5)?;
        let publish_timeout = Self::parse_secs("CLIMATE_LOGGER_PUBLISH_TIMEOUT_SECS", 5)?;
        let keep_alive = Self::parse_secs("CLIMATE_LOGGER_KEEP_ALIVE_SECS", 15)?;

        let sensor_failure_rate = Self::parse_failure_rate()?;

        Ok(Self {
            mqtt_host,
            mqtt_port,
            credentials,
            topic_single,
            topic_batch,
            max_payload_bytes,
            loop_interval,
            clock_update_interval,
            clock_offset_secs,
            buffer_capacity,
            connect_timeout,
            publish_timeout,
            keep_alive,
            sensor_failure_rate,
        })
    }

    /// Parse the transport buffer size with validation.
    fn parse_max_payload_bytes() -> Result<usize, ConfigError> {
        let env_var = "CLIMATE_LOGGER_MAX_PAYLOAD_BYTES";

        match parse_var::<usize>(env_var)? {
            Some(size) if size < MIN_PAYLOAD_BYTES => Err(ConfigError::for_var(
                env_var,
                format!("payload size {} is below minimum ({})", size, MIN_PAYLOAD_BYTES),
            )),
            Some(size) if size > MAX_PAYLOAD_BYTES => Err(ConfigError::for_var(
                env_var,
                format!("payload size {} exceeds maximum ({})", size, MAX_PAYLOAD_BYTES),
            )),
            Some(size) => Ok(size),
            None => Ok(DEFAULT_MAX_PAYLOAD_BYTES),
        }
    }

    /// Parse the loop interval with validation.
    fn parse_loop_interval() -> Result<u64, ConfigError> {
        let env_var = "CLIMATE_LOGGER_LOOP_INTERVAL_MS";

        match parse_var::<u64>(env_var)? {
            Some(ms) if ms < MIN_LOOP_INTERVAL_MS => Err(ConfigError::for_var(
                env_var,
                format!("loop interval {} is below minimum ({}ms)", ms, MIN_LOOP_INTERVAL_MS),
            )),
            Some(ms) if ms > MAX_LOOP_INTERVAL_MS => Err(ConfigError::for_var(
                env_var,
                format!("loop interval {} exceeds maximum ({}ms)", ms, MAX_LOOP_INTERVAL_MS),
            )),
            Some(ms) => Ok(ms),
            None => Ok(DEFAULT_LOOP_INTERVAL_MS),
        }
    }

    /// Parse the optional retry buffer cap; zero is rejected.
    fn parse_buffer_capacity() -> Result<Option<usize>, ConfigError> {
        let env_var = "CLIMATE_LOGGER_BUFFER_CAPACITY";

        match parse_var::<usize>(env_var)? {
            Some(0) => Err(ConfigError::for_var(
                env_var,
                "buffer capacity must be greater than 0",
            )),
            capacity => Ok(capacity),
        }
    }

    /// Parse a positive number of seconds.
    fn parse_secs(env_var: &str, default: u64) -> Result<Duration, ConfigError> {
        match parse_var::<u64>(env_var)? {
            Some(0) => Err(ConfigError::for_var(env_var, "value must be greater than 0")),
            Some(secs) => Ok(Duration::from_secs(secs)),
            None => Ok(Duration::from_secs(default)),
        }
    }

    fn parse_failure_rate() -> Result<f64, ConfigError> {
        let env_var = "CLIMATE_LOGGER_SENSOR_FAILURE_RATE";

        match parse_var::<f64>(env_var)? {
            Some(rate) if !(0.0..=1.0).contains(&rate) => Err(ConfigError::for_var(
                env_var,
                format!("failure rate {} must be between 0.0 and 1.0", rate),
            )),
            Some(rate) => Ok(rate),
            None => Ok(DEFAULT_SENSOR_FAILURE_RATE),
        }
    }
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            mqtt_host: DEFAULT_MQTT_HOST.to_string(),
            mqtt_port: DEFAULT_MQTT_PORT,
            credentials: Credentials::new(generated_client_id()),
            topic_single: DEFAULT_TOPIC_SINGLE.to_string(),
            topic_batch: DEFAULT_TOPIC_BATCH.to_string(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            loop_interval: Duration::from_millis(DEFAULT_LOOP_INTERVAL_MS),
            clock_update_interval: Duration::from_secs(DEFAULT_CLOCK_UPDATE_INTERVAL_SECS),
            clock_offset_secs: 0,
            buffer_capacity: None,
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(15),
            sensor_failure_rate: DEFAULT_SENSOR_FAILURE_RATE,
        }
    }
}
