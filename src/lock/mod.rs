//! Observation of the archival worker's lock.
//!
//! The worker sets a key while it runs and deletes it when done. The pacer
//! only ever checks whether the key exists; it never writes it.

mod memory;
mod redis;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
pub use self::{memory::MemoryLockProbe, redis::RedisLockProbe};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::LockConfig;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("lock store did not answer within {0:?}")]
    Timeout(Duration),
}

pub type LockResult<T> = Result<T, LockError>;

/// Existence check for the lock key.
#[async_trait]
pub trait LockProbe: Send + Sync {
    async fn is_held(&self, key: &str) -> LockResult<bool>;
}

/// Why a wait for the lock to clear ended without the lock clearing.
#[derive(Debug, Error)]
pub enum LockWaitError {
    #[error("lock store failure: {0}")]
    Store(#[from] LockError),

    #[error("lock {key:?} still held after {waited:?}")]
    TimedOut { key: String, waited: Duration },

    #[error("wait for lock {0:?} was cancelled")]
    Cancelled(String),
}

/// Polls the lock key at a fixed interval until it disappears.
#[derive(Clone)]
pub struct LockWaiter {
    probe: Arc<dyn LockProbe>,
    key: String,
    interval: Duration,
    max_wait: Option<Duration>,
}

impl LockWaiter {
    pub fn new(
        probe: Arc<dyn LockProbe>,
        key: impl Into<String>,
        interval: Duration,
        max_wait: Option<Duration>,
    ) -> Self {
        Self {
            probe,
            key: key.into(),
            interval,
            max_wait,
        }
    }

    pub fn from_config(probe: Arc<dyn LockProbe>, config: &LockConfig) -> Self {
        Self::new(
            probe,
            config.key.clone(),
            Duration::from_secs(config.wait_seconds),
            config.max_wait_secs.map(Duration::from_secs),
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Block until the lock key is absent.
    ///
    /// Returns how long the wait took. Cancellation is honoured between polls
    /// and during the sleep.
    pub async fn wait_for_release(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Duration, LockWaitError> {
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(LockWaitError::Cancelled(self.key.clone()));
            }

            if !self.probe.is_held(&self.key).await? {
                let waited = started.elapsed();
                tracing::debug!(
                    key = %self.key,
                    waited_ms = waited.as_millis() as u64,
                    "Archival lock is clear"
                );
                return Ok(waited);
            }

            let waited = started.elapsed();
            let sleep_for = match self.max_wait {
                Some(max) if waited >= max => {
                    return Err(LockWaitError::TimedOut {
                        key: self.key.clone(),
                        waited,
                    });
                }
                Some(max) => self.interval.min(max - waited),
                None => self.interval,
            };

            tracing::info!(
                key = %self.key,
                waited_secs = waited.as_secs(),
                retry_in_secs = sleep_for.as_secs_f64(),
                "Archival lock held, waiting"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(LockWaitError::Cancelled(self.key.clone()));
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}
