use crate::bucket::TakeToken;
use crate::error::{Error, StoreError};
use crate::inner::StoreOptions;
use crate::storage::redis::{normalize_address, pool_config, pool_error};
use crate::storage::{commands, Storage};
use deadpool_redis::Runtime;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Redis Cluster backend.
///
/// Session, pointer and group keys hash to different slots, so multi-key
/// deletes are split per key and group invalidation always takes the
/// two-step path.
#[derive(Clone)]
pub struct RedisClusterStorage {
    pub conn: deadpool_redis::cluster::Pool,
    timeout: Duration,
}

impl RedisClusterStorage {
    pub fn new(pool: deadpool_redis::cluster::Pool, timeout: Duration) -> Self {
        RedisClusterStorage {
            conn: pool,
            timeout,
        }
    }

    /// Builds the pool from `options` without touching the network.
    /// `address` lists the seed nodes, separated by commas.
    pub fn from_options(options: &StoreOptions) -> Result<Self, Error> {
        options.validate()?;
        let urls: Vec<String> = options
            .address
            .split(',')
            .map(str::trim)
            .filter(|node| !node.is_empty())
            .map(|node| node_url(node, options.credential.as_deref()))
            .collect();
        let mut config = deadpool_redis::cluster::Config::from_urls(urls);
        config.pool = Some(pool_config(options));
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| Error::Config(format!("failed to create cluster pool: {err}")))?;
        Ok(RedisClusterStorage::new(pool, options.command_timeout))
    }

    /// Builds the pool and checks that a node answers.
    pub async fn connect(options: &StoreOptions) -> Result<Self, Error> {
        let storage = RedisClusterStorage::from_options(options)?;
        storage.ping().await?;
        info!(address = %options.address, "connected to redis cluster");
        Ok(storage)
    }

    async fn get_conn(&self) -> Result<deadpool_redis::cluster::Connection, StoreError> {
        self.conn
            .get()
            .await
            .map_err(|err| pool_error(err, self.timeout))
    }

    async fn with_conn<T, F, Fut>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(deadpool_redis::cluster::Connection) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let call = async {
            let conn = self.get_conn().await?;
            f(conn).await
        };
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "redis cluster command timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

/// Seed node URL, with the credential as the URL password.
fn node_url(node: &str, credential: Option<&str>) -> String {
    let url = normalize_address(node);
    match (credential, url.split_once("://")) {
        (Some(credential), Some((scheme, rest))) if !rest.contains('@') => {
            format!("{scheme}://:{}@{rest}", encode_userinfo(credential))
        }
        _ => url,
    }
}

fn encode_userinfo(raw: &str) -> String {
    raw.bytes()
        .map(|byte| {
            if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
                char::from(byte).to_string()
            } else {
                format!("%{byte:02X}")
            }
        })
        .collect()
}

impl Storage for RedisClusterStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_conn(|mut conn| async move { commands::get(&mut conn, key).await })
            .await
    }

    async fn set_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.with_conn(|mut conn| async move { commands::set_px(&mut conn, key, value, ttl).await })
            .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.with_conn(|mut conn| async move {
            let mut removed = 0;
            for key in keys {
                removed += commands::del(&mut conn, std::slice::from_ref(key)).await?;
            }
            Ok(removed)
        })
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
}
