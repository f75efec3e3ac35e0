//! Redis connection and lock polling configuration.
//!
//! The archival worker holds a key in Redis while it runs. The pacer never
//! writes that key; it only checks whether it exists.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis URL, including credentials and database number.
    /// Format: redis://[:password@]host:port[/db]
    pub url: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-command response timeout in seconds.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

impl RedisConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("redis://")
            || self.url.starts_with("rediss://")
            || self.url.starts_with("redis+unix://")
            || self.url.starts_with("unix://"))
        {
            return Err(ConfigError::Validation(format!(
                "redis.url must be a redis:// URL (got {:?})",
                self.url
            )));
        }
        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_response_timeout() -> u64 {
    5
}

/// Lock key polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// Key whose existence means the archival worker is busy.
    pub key: String,

    /// Seconds to sleep between existence checks.
    /// Default: 30
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,

    /// Give up waiting after this many seconds. Unbounded when unset.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

impl LockConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.key.is_empty() {
            return Err(ConfigError::Validation("lock.key cannot be empty".into()));
        }
        if self.wait_seconds == 0 {
            return Err(ConfigError::Validation(
                "lock.wait_seconds must be greater than 0".into(),
            ));
        }
        if self.max_wait_secs == Some(0) {
            return Err(ConfigError::Validation(
                "lock.max_wait_secs must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }
}

fn default_wait_seconds() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_defaults() {
        let config: LockConfig = toml::from_str(r#"key = "archive:lock""#).unwrap();
        assert_eq!(config.wait_seconds, 30);
        assert!(config.max_wait_secs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_lock_key_rejected() {
        let config: LockConfig = toml::from_str(r#"key = """#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config: LockConfig = toml::from_str(
            r#"
            key = "archive:lock"
            wait_seconds = 0
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_url_scheme() {
        let ok: RedisConfig = toml::from_str(r#"url = "redis://:pw@cache:6379/2""#).unwrap();
        assert!(ok.validate().is_ok());
        assert_eq!(ok.connect_timeout_secs, 5);

        let bad: RedisConfig = toml::from_str(r#"url = "http://cache:6379""#).unwrap();
        assert!(bad.validate().is_err());
    }
}
