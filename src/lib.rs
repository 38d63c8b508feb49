//! # authstore
//!
//! Session storage with bulk invalidation and distributed token-bucket rate
//! limiting for web authentication, backed by Redis.
//!
//! ## Features
//!
//! - **Sessions**: opaque 20-byte session ids mapped to any serde payload, with a TTL
//! - **Session groups**: tie sessions to a group (usually a user) and invalidate them all at once
//! - **Capped groups**: keep only the N most recent sessions of a group
//! - **Rate limiting**: per-client token buckets, updated atomically server-side
//! - **Storage backends**: Redis, Redis Cluster and in-memory
//! - **Axum integration**: bearer-token authentication middleware
//!
//! ### Feature Flags
//!
//! ```toml
//! [dependencies.authstore]
//! version = "0.1.0"
//! features = [
//!     "redis",          # Redis storage backend (default)
//!     "redis-cluster",  # Redis Cluster support
//!     "tower",          # Axum middleware
//! ]
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use authstore::{SessionId, SessionStore, StoreOptions};
//! use std::time::Duration;
//!
//! # async fn run() -> authstore::Result<()> {
//! let store = SessionStore::connect(
//!     StoreOptions::new()
//!         .address("127.0.0.1:6379")
//!         .session_duration(Duration::from_secs(24 * 60 * 60))
//!         .max_sessions_per_group(10),
//! )
//! .await?;
//!
//! // Log user 42 in.
//! let session = SessionId::generate();
//! store.set_session(&session, Some("42".into()), &"42").await?;
//!
//! // Look the session up on the next request.
//! let user: String = store.session(&session).await?;
//!
//! // Throttle the client: 5 requests per second, bursts of 10.
//! store.consume("203.0.113.7", 5.0, 10.0).await?;
//!
//! // Log user 42 out everywhere.
//! store.invalidate_sessions(user).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Key layout
//!
//! See [`keys`] for the keys written to the store and how their expiry is
//! kept in step.

pub mod bucket;
pub mod error;
pub mod framework;
pub mod inner;
pub mod keys;
pub mod limiter;
pub mod storage;
pub mod store;

pub use error::{Error, Result, StoreError};
pub use inner::*;
pub use limiter::RateLimiter;
pub use storage::memory::MemoryStorage;
pub use storage::Storage;
pub use store::SessionStore;

#[cfg(feature = "redis")]
pub use storage::redis::RedisStorage;
#[cfg(feature = "redis-cluster")]
pub use storage::redis_cluster::RedisClusterStorage;
