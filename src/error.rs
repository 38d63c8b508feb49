use std::time::Duration;

/// Failures surfaced by the session store and the rate limiter.
///
/// Nothing here is recovered internally. Lookups that miss, full buckets and
/// transport failures all propagate so the caller can map them (401, 429,
/// 5xx and so on).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session not found")]
    SessionNotFound,
    #[error("corrupt session payload: {0}")]
    CorruptSession(#[source] serde_json::Error),
    #[error("unsupported group identifier: {0}")]
    UnsupportedGroupIdentifier(String),
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("invalid session id")]
    InvalidSessionId,
    #[error("invalid token bucket: {0}")]
    InvalidBucket(String),
    #[error("failed to encode session payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transport, auth or protocol failure while talking to the key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),
    #[cfg(feature = "redis")]
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[cfg(feature = "redis")]
    #[error("failed to create connection pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),
    #[error("expiry {0:?} is out of range")]
    InvalidExpire(Duration),
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        Error::Store(StoreError::Redis(err))
    }
}

impl Error {
    /// True for failures of the store itself rather than of the request.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(feature = "tower")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use http::StatusCode;

        let status = match self {
            Error::SessionNotFound | Error::InvalidSessionId => StatusCode::UNAUTHORIZED,
            Error::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        status.into_response()
    }
}
