use crate::bucket::TakeToken;
use crate::error::StoreError;
use crate::keys::Membership;
use std::future::Future;
use std::time::Duration;

/// The commands the session store and rate limiter need from a key-value
/// store. Each call is one round trip (or one atomic script).
pub trait Storage: Clone + Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;
    /// Sets `key` with a millisecond-precision expiry.
    fn set_px(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
    /// Deletes every key in `keys`; returns how many existed.
    fn del(&self, keys: &[String]) -> impl Future<Output = Result<u64, StoreError>> + Send;
    fn zadd(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
    fn zrem(
        &self,
        key: &str,
        members: &[String],
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
    /// Members ordered by ascending score, inclusive indices, negative
    /// indices counting from the end.
    fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
    fn zcard(&self, key: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;
    /// Returns false when the key does not exist.
    fn pexpire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
    /// Atomic token-bucket check-and-consume on `key`. True when a token
    /// was taken.
    fn take_token(
        &self,
        key: &str,
        request: TakeToken,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes a group index and every key its entries name. Returns the
    /// number of entries that were enumerated.
    ///
    /// The default enumerates and deletes in two round trips; backends
    /// with a scripting engine override this with an atomic variant.
    fn invalidate_group(
        &self,
        group_key: &str,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send {
        two_step_invalidate(self, group_key)
    }
}

/// Enumerates a group index, then deletes it along with the keys its
/// entries name. Entries added between the two round trips survive.
pub(crate) async fn two_step_invalidate<S: Storage>(
    storage: &S,
    group_key: &str,
) -> Result<u64, StoreError> {
    let members = storage.zrange(group_key, 0, -1).await?;
    let mut keys = Vec::with_capacity(members.len() * 2 + 1);
    keys.push(group_key.to_string());
    for entry in &members {
        keys.extend(Membership::decode(entry).keys().map(str::to_string));
    }
    storage.del(&keys).await?;
    Ok(members.len() as u64)
}

pub mod memory;
#[cfg(feature = "redis")]
mod commands;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "redis-cluster")]
pub mod redis_cluster;
