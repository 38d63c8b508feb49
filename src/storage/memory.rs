//! Process-local storage on a [`moka`] cache.
//!
//! Every entry carries its own deadline and the cache evicts it once that
//! passes, whether or not the key is read again. Commands run one at a time
//! behind an async mutex, so multi-key commands and the token bucket are
//! atomic with respect to other callers.

use crate::bucket::{BucketState, TakeToken};
use crate::error::StoreError;
use crate::keys::Membership;
use crate::storage::Storage;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Deadlines further out than this are kept by the entry itself but not
/// scheduled in the cache.
const EVICTION_HORIZON: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Sorted(Vec<ScoredMember>),
    Bucket(BucketState),
}

#[derive(Debug, Clone)]
struct ScoredMember {
    member: String,
    score: f64,
    seq: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

struct EntryExpiry;

impl EntryExpiry {
    fn remaining(entry: &Entry, from: Instant) -> Option<Duration> {
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(from))
            .filter(|ttl| *ttl <= EVICTION_HORIZON)
    }
}

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &Entry, created_at: Instant) -> Option<Duration> {
        EntryExpiry::remaining(entry, created_at)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        updated_at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        EntryExpiry::remaining(entry, updated_at)
    }
}

fn deadline(ttl: Duration) -> Result<Instant, StoreError> {
    Instant::now()
        .checked_add(ttl)
        .ok_or(StoreError::InvalidExpire(ttl))
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::UnexpectedReply(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

/// Resolves Redis-style inclusive range indices against `len`.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// In-memory [`Storage`] for tests and single-process deployments.
#[derive(Clone)]
pub struct MemoryStorage {
    cache: Cache<String, Entry>,
    /// Serializes commands; counts sorted-set inserts to order equal scores.
    sequence: Arc<Mutex<u64>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        MemoryStorage::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            cache: Cache::builder().expire_after(EntryExpiry).build(),
            sequence: Arc::new(Mutex::new(0)),
        }
    }

    async fn live(&self, key: &str) -> Option<Entry> {
        let entry = self.cache.get(key).await?;
        entry.is_live(Instant::now()).then_some(entry)
    }

    async fn sorted(
        &self,
        key: &str,
    ) -> Result<Option<(Vec<ScoredMember>, Option<Instant>)>, StoreError> {
        match self.live(key).await {
            None => Ok(None),
            Some(Entry {
                value: Value::Sorted(members),
                expires_at,
            }) => Ok(Some((members, expires_at))),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn put(&self, key: &str, value: Value, expires_at: Option<Instant>) {
        self.cache
            .insert(key.to_string(), Entry { value, expires_at })
            .await;
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.cache
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries the cache still holds, expired ones not yet evicted included.
    /// Exact after [`MemoryStorage::run_pending_tasks`].
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending cache maintenance, evicting every expired entry.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Remaining time to live of `key`, `None` when missing or persistent.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let at = self.live(key).await?.expires_at?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    /// Removes every key.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let _guard = self.sequence.lock().await;
        match self.live(key).await {
            None => Ok(None),
            Some(Entry {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_px(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let expires_at = deadline(ttl)?;
        let _guard = self.sequence.lock().await;
        self.put(key, Value::Bytes(value.to_vec()), Some(expires_at))
            .await;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let _guard = self.sequence.lock().await;
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = self.cache.remove(key.as_str()).await {
                if entry.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut sequence = self.sequence.lock().await;
        *sequence += 1;
        let (mut members, expires_at) = self.sorted(key).await?.unwrap_or_default();
        members.retain(|m| m.member != member);
        members.push(ScoredMember {
            member: member.to_string(),
            score,
            seq: *sequence,
        });
        members.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.seq.cmp(&b.seq)));
        self.put(key, Value::Sorted(members), expires_at).await;
        Ok(())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        let _guard = self.sequence.lock().await;
        let Some((mut set, expires_at)) = self.sorted(key).await? else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|m| !members.contains(&m.member));
        let removed = (before - set.len()) as u64;
        if set.is_empty() {
            self.cache.invalidate(key).await;
        } else if removed > 0 {
            self.put(key, Value::Sorted(set), expires_at).await;
        }
        Ok(removed)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let _guard = self.sequence.lock().await;
        let Some((set, _)) = self.sorted(key).await? else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(set.len(), start, stop) {
            Some((start, stop)) => set[start..=stop].iter().map(|m| m.member.clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let _guard = self.sequence.lock().await;
        Ok(self
            .sorted(key)
            .await?
            .map_or(0, |(set, _)| set.len() as u64))
    }

    async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let expires_at = deadline(ttl)?;
        let _guard = self.sequence.lock().await;
        match self.live(key).await {
            Some(entry) => {
                self.put(key, entry.value, Some(expires_at)).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn take_token(&self, key: &str, request: TakeToken) -> Result<bool, StoreError> {
        let _guard = self.sequence.lock().await;
        let current = match self.live(key).await {
            None => None,
            Some(Entry {
                value: Value::Bucket(bucket),
                ..
            }) => Some(bucket),
            Some(_) => return Err(wrong_type(key)),
        };
        let outcome = BucketState::take(current, request);
        let expires_at = deadline(outcome.ttl)?;
        self.put(key, Value::Bucket(outcome.state), Some(expires_at))
            .await;
        Ok(outcome.allowed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn invalidate_group(&self, group_key: &str) -> Result<u64, StoreError> {
        let _guard = self.sequence.lock().await;
        let members: Vec<String> = match self.sorted(group_key).await? {
            Some((set, _)) => set.into_iter().map(|m| m.member).collect(),
            None => Vec::new(),
        };
        for entry in &members {
            for key in Membership::decode(entry).keys() {
                self.cache.invalidate(key).await;
            }
        }
        self.cache.invalidate(group_key).await;
        Ok(members.len() as u64)
    }
}
