//! Runs against a live server when `AUTHSTORE_REDIS_URL` is set, e.g.
//! `AUTHSTORE_REDIS_URL=redis://127.0.0.1:6379/15`. Skipped otherwise.
#![cfg(feature = "redis")]

mod common;

use authstore::{InvalidationMode, RedisStorage, SessionStore, StoreOptions};
use std::time::Duration;

async fn connect(options: StoreOptions) -> Option<SessionStore<RedisStorage>> {
    let url = std::env::var("AUTHSTORE_REDIS_URL").ok()?;
    let prefix = format!("authstore-test:{}:", authstore::SessionId::generate());
    Some(
        SessionStore::connect(options.address(&url).key_prefix(&prefix))
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn sessions_and_groups() {
    let Some(store) = connect(common::options()).await else {
        return;
    };
    common::round_trip(&store).await;
    common::other_ids_miss(&store).await;
    common::group_accounting(&store).await;
    common::invalidation_clears_group(&store).await;
    common::delete_is_idempotent(&store).await;
    common::corrupt_payload_is_distinct(&store).await;
}

#[tokio::test]
async fn atomic_invalidation() {
    let Some(store) = connect(common::options().invalidation(InvalidationMode::Atomic)).await else {
        return;
    };
    common::invalidation_clears_group(&store).await;
    common::group_accounting(&store).await;
}

#[tokio::test]
async fn capped_groups() {
    let Some(store) = connect(common::options().max_sessions_per_group(5)).await else {
        return;
    };
    common::capped_group_keeps_newest(&store).await;
}

#[tokio::test]
async fn expiry_triad() {
    let ttl = Duration::from_millis(300);
    let Some(store) = connect(common::options().session_duration(ttl)).await else {
        return;
    };
    common::group_keys_share_session_ttl(&store, ttl).await;
}

#[tokio::test]
async fn token_bucket() {
    let Some(store) = connect(common::options()).await else {
        return;
    };
    common::token_bucket_refills(&store).await;
    common::token_bucket_allows_bursts(&store).await;
    common::token_bucket_is_atomic(&store).await;
}
