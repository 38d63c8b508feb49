use crate::bucket::TakeToken;
use crate::error::{Error, StoreError};
use crate::inner::StoreOptions;
use crate::storage::{commands, Storage};
use deadpool_redis::redis::IntoConnectionInfo;
use deadpool_redis::{PoolConfig, Runtime, Timeouts};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Standalone Redis backend over a deadpool connection pool.
///
/// Connections are checked out per command and returned right after.
/// deadpool-redis pings a connection when recycling it and drops it when
/// the ping fails.
#[derive(Clone)]
pub struct RedisStorage {
    pub conn: deadpool_redis::Pool,
    timeout: Duration,
}

impl RedisStorage {
    pub fn new(pool: deadpool_redis::Pool, timeout: Duration) -> Self {
        RedisStorage {
            conn: pool,
            timeout,
        }
    }

    /// Builds the pool from `options` without touching the network.
    pub fn from_options(options: &StoreOptions) -> Result<Self, Error> {
        options.validate()?;
        let mut info = normalize_address(&options.address)
            .as_str()
            .into_connection_info()?;
        if let Some(credential) = &options.credential {
            info.redis.password = Some(credential.clone());
        }

        let mut config = deadpool_redis::Config::from_connection_info(info);
        config.pool = Some(pool_config(options));
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(StoreError::from)?;
        Ok(RedisStorage::new(pool, options.command_timeout))
    }

    /// Builds the pool and verifies the server is reachable (and accepts the
    /// credential) by preloading the token-bucket script.
    pub async fn connect(options: &StoreOptions) -> Result<Self, Error> {
        let storage = RedisStorage::from_options(options)?;
        let sha = storage
            .with_conn(|mut conn| async move {
                Ok(commands::TOKEN_BUCKET
                    .prepare_invoke()
                    .load_async(&mut conn)
                    .await?)
            })
            .await?;
        info!(address = %options.address, script = %sha, "connected to redis");
        Ok(storage)
    }

    async fn get_conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.conn
            .get()
            .await
            .map_err(|err| pool_error(err, self.timeout))
    }

    /// Runs one round trip on a pooled connection, bounded by the command
    /// timeout.
    async fn with_conn<T, F, Fut>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(deadpool_redis::Connection) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let call = async {
            let conn = self.get_conn().await?;
            f(conn).await
        };
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "redis command timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

/// Pool sized by `options`, with checkout, connect and recycle each
/// bounded by the command timeout.
pub(crate) fn pool_config(options: &StoreOptions) -> PoolConfig {
    let mut timeouts = Timeouts::default();
    timeouts.wait = Some(options.command_timeout);
    timeouts.create = Some(options.command_timeout);
    timeouts.recycle = Some(options.command_timeout);
    let mut pool_config = PoolConfig::new(options.pool_size);
    pool_config.timeouts = timeouts;
    pool_config
}

/// Pool timeouts surface the same way as command timeouts.
pub(crate) fn pool_error(err: deadpool_redis::PoolError, timeout: Duration) -> StoreError {
    match err {
        deadpool_redis::PoolError::Timeout(_) => StoreError::Timeout(timeout),
        err => StoreError::Pool(err),
    }
}

/// Accepts `host:port`, `:port` (local host) or a full URL.
pub(crate) fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if address.contains("://") {
        address.to_string()
    } else if let Some(port) = address.strip_prefix(':') {
        format!("redis://127.0.0.1:{port}")
    } else {
        format!("redis://{address}")
    }
}

impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_conn(|mut conn| async move { commands::get(&mut conn, key).await })
            .await
    }

    async fn set_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.with_conn(|mut conn| async move { commands::set_px(&mut conn, key, value, ttl).await })
            .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.with_conn(|mut conn| async move { commands::del(&mut conn, keys).await })
            .await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.with_conn(|mut conn| async move { commands::zadd(&mut conn, key, member, score).await })
            .await
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        self.with_conn(|mut conn| async move { commands::zrem(&mut conn, key, members).await })
            .await
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        self.with_conn(|mut conn| async move { commands::zrange(&mut conn, key, start, stop).await })
            .await
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        self.with_conn(|mut conn| async move { commands::zcard(&mut conn, key).await })
            .await
    }

    async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_conn(|mut conn| async move { commands::pexpire(&mut conn, key, ttl).await })
            .await
    }

    async fn take_token(&self, key: &str, request: TakeToken) -> Result<bool, StoreError> {
        self.with_conn(|mut conn| async move { commands::take_token(&mut conn, key, request).await })
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|mut conn| async move { commands::ping(&mut conn).await })
            .await
    }

    async fn invalidate_group(&self, group_key: &str) -> Result<u64, StoreError> {
        let removed = self
            .with_conn(|mut conn| async move { commands::invalidate_group(&mut conn, group_key).await })
            .await?;
        debug!(group_key, removed, "invalidated group atomically");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_become_urls() {
        assert_eq!(normalize_address(":6379"), "redis://127.0.0.1:6379");
        assert_eq!(normalize_address("cache:6380"), "redis://cache:6380");
        assert_eq!(
            normalize_address("rediss://cache:6380/2"),
            "rediss://cache:6380/2"
        );
    }

    #[tokio::test]
    async fn pool_builds_without_a_server() {
        let options = StoreOptions::new()
            .address(":6399")
            .credential("secret")
            .pool_size(2);
        let storage = RedisStorage::from_options(&options).unwrap();
        assert_eq!(storage.conn.status().max_size, 2);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timeout = Duration::from_millis(50);
        let options = StoreOptions::new()
            .address(&format!(":{port}"))
            .command_timeout(timeout);
        let storage = RedisStorage::from_options(&options).unwrap();

        let started = std::time::Instant::now();
        let result = storage.get("k").await;
        assert!(
            matches!(result, Err(StoreError::Timeout(t)) if t == timeout),
            "{result:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(2));
        server.abort();
    }
}
