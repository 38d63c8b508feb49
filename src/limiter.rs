use crate::bucket::TakeToken;
use crate::error::{Error, Result};
use crate::keys::KeyCodec;
use crate::storage::Storage;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Distributed token-bucket rate limiter keyed by client identity.
///
/// The check-and-consume runs as one atomic operation in the storage
/// backend, so concurrent callers on the same client key are totally
/// ordered without any local locking.
#[derive(Clone)]
pub struct RateLimiter<S: Storage> {
    storage: S,
    keys: KeyCodec,
}

impl<S: Storage> RateLimiter<S> {
    pub fn new(storage: S, keys: KeyCodec) -> Self {
        RateLimiter { storage, keys }
    }

    /// Takes one token from `client`'s bucket.
    ///
    /// `rate` is the refill speed in tokens per second and `capacity` the
    /// bucket size. A client seen for the first time (or whose bucket has
    /// expired after refilling) starts with a full bucket.
    ///
    /// Fails with [`Error::RateLimitExceeded`] when no whole token is left.
    pub async fn consume(&self, client: &str, rate: f64, capacity: f64) -> Result<()> {
        let request = TakeToken {
            now_ns: now_nanos(),
            rate_per_ns: rate / 1e9,
            capacity,
        };
        self.consume_at(client, rate, request).await
    }

    async fn consume_at(&self, client: &str, rate: f64, request: TakeToken) -> Result<()> {
        validate(rate, request.capacity)?;
        let key = self.keys.rate_limit_key(client);
        if self.storage.take_token(&key, request).await? {
            Ok(())
        } else {
            debug!(client, rate, capacity = request.capacity, "rate limit exceeded");
            Err(Error::RateLimitExceeded)
        }
    }
}

fn validate(rate: f64, capacity: f64) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::InvalidBucket(format!(
            "rate must be a positive number of tokens per second, got {rate}"
        )));
    }
    if !capacity.is_finite() || capacity < 1.0 {
        return Err(Error::InvalidBucket(format!(
            "capacity must hold at least one token, got {capacity}"
        )));
    }
    Ok(())
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as i64)
}
