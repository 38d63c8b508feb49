use crate::error::{Error, Result};
use crate::inner::{GroupId, InvalidationMode, SessionId, StoreOptions};
use crate::keys::{KeyCodec, Membership};
use crate::limiter::RateLimiter;
use crate::storage::memory::MemoryStorage;
use crate::storage::{self, Storage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Sessions, session groups and per-client rate limits on top of a shared
/// key-value store.
///
/// A session lives under its own key. When it belongs to a group, a pointer
/// key records the group and the group's sorted set gets one entry naming
/// both keys. All three carry the session duration as TTL, so an untouched
/// session disappears with its bookkeeping. None of the multi-command
/// sequences are transactions: concurrent writers may leave orphaned
/// entries behind, which then expire on their own.
#[derive(Clone)]
pub struct SessionStore<S: Storage> {
    storage: S,
    keys: KeyCodec,
    session_duration: Duration,
    max_sessions_per_group: usize,
    invalidation: InvalidationMode,
    limiter: RateLimiter<S>,
}

#[cfg(feature = "redis")]
impl SessionStore<crate::storage::redis::RedisStorage> {
    /// Connects to the Redis server named in `options`.
    pub async fn connect(options: StoreOptions) -> Result<Self> {
        let storage = crate::storage::redis::RedisStorage::connect(&options).await?;
        SessionStore::new(storage, options)
    }
}

impl SessionStore<MemoryStorage> {
    pub fn in_memory(options: StoreOptions) -> Result<Self> {
        SessionStore::new(MemoryStorage::new(), options)
    }
}

impl<S: Storage> SessionStore<S> {
    pub fn new(storage: S, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let keys = KeyCodec::new(&options.key_prefix);
        Ok(SessionStore {
            limiter: RateLimiter::new(storage.clone(), keys.clone()),
            storage,
            keys,
            session_duration: options.session_duration,
            max_sessions_per_group: options.max_sessions_per_group,
            invalidation: options.invalidation,
        })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn keys(&self) -> &KeyCodec {
        &self.keys
    }

    pub fn rate_limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    /// Stores `payload` under `id`, optionally adding the session to `group`.
    ///
    /// When the group is capped, the oldest sessions beyond the cap are
    /// deleted.
    pub async fn set_session<T>(&self, id: &SessionId, group: Option<GroupId>, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_vec(payload).map_err(Error::Encode)?;
        let group = group.map(|group| group.to_key_string()).transpose()?;

        let session_key = self.keys.session_key(id);
        self.storage
            .set_px(&session_key, &encoded, self.session_duration)
            .await?;

        let Some(group) = group else {
            debug!(session = %id, "stored session");
            return Ok(());
        };

        let membership = self.keys.membership(id);
        let group_key = self.keys.group_key(&group);
        self.storage
            .set_px(&membership.pointer_key, group.as_bytes(), self.session_duration)
            .await?;
        self.storage
            .zadd(&group_key, &membership.encode(), next_score())
            .await?;
        self.storage
            .pexpire(&group_key, self.session_duration)
            .await?;
        debug!(session = %id, group = %group, "stored grouped session");

        if self.max_sessions_per_group > 0 {
            self.enforce_cap(&group_key).await?;
        }
        Ok(())
    }

    async fn enforce_cap(&self, group_key: &str) -> Result<()> {
        let count = self.storage.zcard(group_key).await? as usize;
        if count <= self.max_sessions_per_group {
            return Ok(());
        }
        let excess = count - self.max_sessions_per_group;
        let oldest = self
            .storage
            .zrange(group_key, 0, excess as isize - 1)
            .await?;
        self.storage.zrem(group_key, &oldest).await?;
        let doomed: Vec<String> = oldest
            .iter()
            .flat_map(|entry| {
                Membership::decode(entry)
                    .keys()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        self.storage.del(&doomed).await?;
        warn!(
            group_key,
            evicted = oldest.len(),
            cap = self.max_sessions_per_group,
            "evicted oldest sessions over group cap"
        );
        Ok(())
    }

    /// Loads and decodes the session stored under `id`.
    pub async fn session<T: DeserializeOwned>(&self, id: &SessionId) -> Result<T> {
        let Some(encoded) = self.storage.get(&self.keys.session_key(id)).await? else {
            return Err(Error::SessionNotFound);
        };
        serde_json::from_slice(&encoded).map_err(Error::CorruptSession)
    }

    /// Deletes a session and, when its group pointer is still around, its
    /// group membership. Deleting a missing session is not an error.
    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        let membership = self.keys.membership(id);
        self.storage
            .del(std::slice::from_ref(&membership.session_key))
            .await?;

        let Some(group) = self.storage.get(&membership.pointer_key).await? else {
            debug!(session = %id, "deleted ungrouped session");
            return Ok(());
        };
        let group = String::from_utf8_lossy(&group);
        let group_key = self.keys.group_key(&group);
        self.storage
            .del(std::slice::from_ref(&membership.pointer_key))
            .await?;
        self.storage
            .zrem(&group_key, &[membership.encode()])
            .await?;
        debug!(session = %id, group = %group, "deleted grouped session");
        Ok(())
    }

    /// Deletes every session currently listed in `group`, and the group itself.
    pub async fn invalidate_sessions(&self, group: impl Into<GroupId>) -> Result<()> {
        let group = group.into().to_key_string()?;
        let group_key = self.keys.group_key(&group);
        let removed = match self.invalidation {
            InvalidationMode::Atomic => self.storage.invalidate_group(&group_key).await?,
            InvalidationMode::BestEffort => {
                storage::two_step_invalidate(&self.storage, &group_key).await?
            }
        };
        debug!(group = %group, removed, "invalidated session group");
        Ok(())
    }

    /// Membership entries of `group`, oldest first.
    pub async fn group_members(&self, group: impl Into<GroupId>) -> Result<Vec<Membership>> {
        let group = group.into().to_key_string()?;
        let entries = self
            .storage
            .zrange(&self.keys.group_key(&group), 0, -1)
            .await?;
        Ok(entries.iter().map(|entry| Membership::decode(entry)).collect())
    }

    /// Takes one token from `client`'s bucket; see [`RateLimiter::consume`].
    pub async fn consume(&self, client: &str, rate: f64, capacity: f64) -> Result<()> {
        self.limiter.consume(client, rate, capacity).await
    }
}

/// Group entry score: wall-clock microseconds, bumped past the previous
/// score so entries written by this process never tie.
fn next_score() -> f64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_micros() as u64);
    let (Ok(prev) | Err(prev)) =
        LAST.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
            Some(now.max(last + 1))
        });
    now.max(prev + 1) as f64
}
