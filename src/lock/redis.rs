use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};

use super::{LockError, LockProbe, LockResult};
use crate::config::RedisConfig;

/// Lock probe backed by a Redis `EXISTS` check.
///
/// Holds one multiplexed connection; clones of it share the underlying socket.
pub struct RedisLockProbe {
    connection: MultiplexedConnection,
    response_timeout: Duration,
}

impl RedisLockProbe {
    pub async fn from_config(config: &RedisConfig) -> LockResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;

        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let connection =
            tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| LockError::Timeout(connect_timeout))??;

        Ok(Self {
            connection,
            response_timeout: Duration::from_secs(config.response_timeout_secs),
        })
    }

    /// Round-trip a PING, used at startup to fail fast on bad credentials.
    pub async fn ping(&self) -> LockResult<()> {
        let mut conn = self.connection.clone();
        tokio::time::timeout(
            self.response_timeout,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| LockError::Timeout(self.response_timeout))??;
        Ok(())
    }
}

#[async_trait]
impl LockProbe for RedisLockProbe {
    async fn is_held(&self, key: &str) -> LockResult<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = tokio::time::timeout(self.response_timeout, conn.exists(key))
            .await
            .map_err(|_| LockError::Timeout(self.response_timeout))??;
        Ok(exists)
    }
}

#[cfg(all(
    test,
    any(
        feature = "database-sqlite",
        feature = "database-postgres",
        feature = "database-mysql"
    )
))]
mod tests {
    use redis::AsyncCommands;

    use super::*;
    use crate::db::tests::harness::redis::create_redis_container;

    #[tokio::test]
    #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
    async fn test_exists_tracks_key() {
        let (url, _container) = create_redis_container().await;
        let config = RedisConfig {
            url: url.clone(),
            connect_timeout_secs: 5,
            response_timeout_secs: 5,
        };

        let probe = RedisLockProbe::from_config(&config).await.unwrap();
        probe.ping().await.unwrap();
        assert!(!probe.is_held("archive:lock").await.unwrap());

        let client = redis::Client::open(url.as_str()).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = conn.set("archive:lock", "worker-1").await.unwrap();
        assert!(probe.is_held("archive:lock").await.unwrap());

        let _: () = conn.del("archive:lock").await.unwrap();
        assert!(!probe.is_held("archive:lock").await.unwrap());
    }
}
