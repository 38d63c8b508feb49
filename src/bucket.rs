//! Token-bucket arithmetic shared by every storage backend.
//!
//! The Redis backend runs [`TOKEN_BUCKET_SCRIPT`], the in-memory backend
//! calls [`BucketState::take`] under its lock. Both follow the same rules:
//! a missing bucket starts full, refill is proportional to elapsed time and
//! capped at capacity, a non-positive interval never refills, one whole
//! token is taken per success and the key expires once it would be full
//! again.

use std::time::Duration;

/// Hash fields: `t` last update (ns since the epoch), `b` tokens.
///
/// KEYS[1] = bucket key
/// ARGV[1] = now (ns)
/// ARGV[2] = rate (tokens per ns)
/// ARGV[3] = capacity
///
/// Returns 1 when a token was taken, 0 otherwise.
pub const TOKEN_BUCKET_SCRIPT: &str = r#"
    local now = tonumber(ARGV[1])
    local rate = tonumber(ARGV[2])
    local capacity = tonumber(ARGV[3])

    local bucket = redis.call('HMGET', KEYS[1], 't', 'b')
    local updated = tonumber(bucket[1]) or 0
    local tokens = tonumber(bucket[2])
    local stamp = ARGV[1]

    if tokens == nil then
        tokens = capacity
    elseif now > updated then
        tokens = math.min(capacity, tokens + (now - updated) * rate)
    else
        stamp = bucket[1]
    end

    local ok = 0
    if tokens >= 1 then
        tokens = tokens - 1
        ok = 1
    end

    redis.call('HSET', KEYS[1], 't', stamp, 'b', tostring(tokens))
    redis.call('PEXPIRE', KEYS[1], math.max(1, math.ceil((capacity - tokens) / rate / 1e6)))

    return ok
"#;

/// A single consume request against one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeToken {
    /// Caller clock, nanoseconds since the epoch.
    pub now_ns: i64,
    /// Refill rate in tokens per nanosecond.
    pub rate_per_ns: f64,
    pub capacity: f64,
}

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub updated_ns: i64,
    pub tokens: f64,
}

/// Result of applying a [`TakeToken`] to a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeOutcome {
    pub allowed: bool,
    pub state: BucketState,
    /// Time until the bucket is full again; used as the key's expiry.
    pub ttl: Duration,
}

impl BucketState {
    pub fn take(current: Option<BucketState>, request: TakeToken) -> TakeOutcome {
        let (mut tokens, updated_ns) = match current {
            None => (request.capacity, request.now_ns),
            Some(state) if request.now_ns > state.updated_ns => {
                let elapsed = (request.now_ns - state.updated_ns) as f64;
                (
                    request
                        .capacity
                        .min(state.tokens + elapsed * request.rate_per_ns),
                    request.now_ns,
                )
            }
            Some(state) => (state.tokens, state.updated_ns),
        };

        let allowed = tokens >= 1.0;
        if allowed {
            tokens -= 1.0;
        }

        let refill_ms = ((request.capacity - tokens) / request.rate_per_ns / 1e6).ceil();
        let ttl = Duration::from_millis(refill_ms.max(1.0).min(u64::MAX as f64) as u64);

        TakeOutcome {
            allowed,
            state: BucketState { updated_ns, tokens },
            ttl,
        }
    }
}
