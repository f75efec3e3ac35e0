use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Archival trigger endpoint.
///
/// # Example
///
/// ```toml
/// [trigger]
/// url = "https://archiver.internal/api/archive/run"
/// timeout_secs = 30
///
/// [trigger.retry_policy]
/// total = 3
/// backoff_factor = 1.0
/// status_forcelist = [429, 500, 502, 503, 504]
///
/// [trigger.connection_pool]
/// max_idle_per_host = 20
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    /// URL that receives one body-less POST per iteration.
    pub url: String,

    /// Total timeout for a single trigger request in seconds.
    /// Default: 30
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Issue a HEAD request at startup and report whether the endpoint keeps
    /// connections alive.
    #[serde(default = "default_true")]
    pub check_keep_alive: bool,

    #[serde(default)]
    pub retry_policy: RetryPolicyConfig,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

impl TriggerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "trigger.url must be an http(s) URL (got {:?})",
                self.url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "trigger.timeout_secs must be greater than 0".into(),
            ));
        }
        self.retry_policy.validate()
    }

    /// Build the pooled client used for every trigger call.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(
                self.connection_pool.connect_timeout_secs,
            ))
            .pool_max_idle_per_host(self.connection_pool.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(self.connection_pool.idle_timeout_secs))
            .user_agent(concat!("archive-pacer/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Upper bound for `retry_policy.total`.
pub const MAX_RETRY_TOTAL: u32 = 100;

/// Transport-level retry policy for the trigger call.
///
/// Retries happen on the listed status codes and on connect/timeout errors,
/// with exponential backoff of `backoff_factor * 2^n` seconds. The trigger is
/// a POST, so a retried request can start the worker a second time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicyConfig {
    /// Maximum number of retries (not including the initial request), at most 100.
    /// `0` sends exactly one request per iteration.
    #[serde(default = "default_total")]
    pub total: u32,

    /// Base of the exponential backoff, in seconds.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Status codes that should trigger a retry.
    /// Default: 429, 500, 502, 503, 504.
    #[serde(default = "default_status_forcelist")]
    pub status_forcelist: Vec<u16>,

    /// Upper bound for a single backoff delay, in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            total: default_total(),
            backoff_factor: default_backoff_factor(),
            status_forcelist: default_status_forcelist(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl RetryPolicyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.total > MAX_RETRY_TOTAL {
            return Err(ConfigError::Validation(format!(
                "trigger.retry_policy.total must be at most {MAX_RETRY_TOTAL} (got {})",
                self.total
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(ConfigError::Validation(format!(
                "trigger.retry_policy.backoff_factor must be a non-negative number (got {})",
                self.backoff_factor
            )));
        }
        if let Some(code) = self
            .status_forcelist
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            return Err(ConfigError::Validation(format!(
                "trigger.retry_policy.status_forcelist contains invalid status code {code}"
            )));
        }
        Ok(())
    }

    /// Check if a status code should trigger a retry.
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }

    /// Calculate the delay before retry `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.backoff_factor * 2f64.powi(attempt.min(62) as i32);
        let capped = base.min(self.max_backoff_secs as f64).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

fn default_total() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_status_forcelist() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_max_backoff_secs() -> u64 {
    120
}

/// Connection pool limits for the trigger client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionPoolConfig {
    /// Maximum idle connections kept per host.
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    /// Idle connection timeout in seconds.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_max_idle_per_host(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_max_idle_per_host() -> usize {
    20
}

fn default_idle_timeout_secs() -> u64 {
    90
}

fn default_connect_timeout_secs() -> u64 {
    10
}
