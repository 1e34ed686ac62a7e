//! Queue configuration.

use std::env;
use std::time::Duration;

use thiserror::Error;

use super::entities::ProtocolFamily;

/// Largest payload a notification or verdict may carry.
pub const MAX_COPY_RANGE: u32 = 0xFFFF;

/// Default maximum number of queued packets.
pub const DEFAULT_MAX_LEN: usize = 1024;

/// Configuration validation errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_len must be at least 1")]
    ZeroMaxLen,

    #[error("max_copy_range {0} exceeds 65535")]
    CopyRangeTooLarge(u32),

    #[error("{name} must be non-zero")]
    ZeroDuration { name: &'static str },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Verdict queue configuration.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Maximum packets held at once; tunable at runtime.
    pub max_len: usize,
    /// Upper bound applied to the peer's requested copy range.
    pub max_copy_range: u32,
    /// Delay before retrying notifications deferred by a transient failure.
    pub retry_interval: Duration,
    /// How long shutdown waits for the worker to go idle.
    pub shutdown_timeout: Duration,
    /// Polling step while waiting for the worker.
    pub shutdown_poll_interval: Duration,
    /// Family the queue registers its hook for.
    pub family: ProtocolFamily,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
            max_copy_range: MAX_COPY_RANGE,
            retry_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(2),
            shutdown_poll_interval: Duration::from_millis(5),
            family: ProtocolFamily::Ipv4,
        }
    }
}

impl QueueConfig {
    /// Creates a small, fast config for testing.
    pub fn for_testing() -> Self {
        Self {
            max_len: 16,
            retry_interval: Duration::from_millis(2),
            shutdown_timeout: Duration::from_millis(500),
            shutdown_poll_interval: Duration::from_millis(1),
            ..Self::default()
        }
    }

    /// Reads overrides from the environment.
    ///
    /// - `VQ_MAX_LEN`: maximum queue length (default: 1024)
    /// - `VQ_MAX_COPY_RANGE`: copy range ceiling (default: 65535)
    /// - `VQ_RETRY_INTERVAL_MS`: deferred notification retry (default: 10)
    /// - `VQ_SHUTDOWN_TIMEOUT_MS`: worker drain timeout (default: 2000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("VQ_MAX_LEN")? {
            config.max_len = v;
        }
        if let Some(v) = env_parse::<u32>("VQ_MAX_COPY_RANGE")? {
            config.max_copy_range = v;
        }
        if let Some(v) = env_parse::<u64>("VQ_RETRY_INTERVAL_MS")? {
            config.retry_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("VQ_SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown_timeout = Duration::from_millis(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_len == 0 {
            return Err(ConfigError::ZeroMaxLen);
        }
        if self.max_copy_range > MAX_COPY_RANGE {
            return Err(ConfigError::CopyRangeTooLarge(self.max_copy_range));
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "retry_interval",
            });
        }
        if self.shutdown_poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "shutdown_poll_interval",
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => {
            let parsed = value.trim().parse::<T>();
            match parsed {
                Ok(v) => Ok(Some(v)),
                Err(_) => Err(ConfigError::InvalidEnv { var, value }),
            }
        }
        Err(_) => Ok(None),
    }
}
