#![allow(dead_code)]

use authstore::keys::Membership;
use authstore::{Error, SessionId, SessionStore, Storage, StoreOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Login {
    pub user: String,
    pub roles: Vec<String>,
}

pub fn login(user: &str) -> Login {
    Login {
        user: user.to_string(),
        roles: vec!["member".to_string()],
    }
}

pub fn options() -> StoreOptions {
    StoreOptions::new().session_duration(Duration::from_secs(30))
}

pub async fn round_trip<S: Storage>(store: &SessionStore<S>) {
    let id = SessionId::generate();
    let payload = login("ada");
    store.set_session(&id, None, &payload).await.unwrap();
    let back: Login = store.session(&id).await.unwrap();
    assert_eq!(back, payload);
}

pub async fn other_ids_miss<S: Storage>(store: &SessionStore<S>) {
    let a = SessionId::generate();
    let b = SessionId::generate();
    store.set_session(&a, None, &login("a")).await.unwrap();
    assert!(matches!(
        store.session::<Login>(&b).await,
        Err(Error::SessionNotFound)
    ));
}

pub async fn group_accounting<S: Storage>(store: &SessionStore<S>) {
    let group = SessionId::generate();
    let first = SessionId::generate();
    let second = SessionId::generate();
    store
        .set_session(&first, Some(group.into()), &"1")
        .await
        .unwrap();
    store
        .set_session(&second, Some(group.into()), &"2")
        .await
        .unwrap();
    assert_eq!(store.group_members(group).await.unwrap().len(), 2);

    store.delete_session(&first).await.unwrap();
    let members = store.group_members(group).await.unwrap();
    assert_eq!(members, vec![store.keys().membership(&second)]);
    assert!(matches!(
        store.session::<String>(&first).await,
        Err(Error::SessionNotFound)
    ));
    assert_eq!(store.session::<String>(&second).await.unwrap(), "2");

    store.invalidate_sessions(group).await.unwrap();
    assert!(matches!(
        store.session::<String>(&second).await,
        Err(Error::SessionNotFound)
    ));
    assert!(store.group_members(group).await.unwrap().is_empty());
}

/// Expects the store to cap groups at five sessions.
pub async fn capped_group_keeps_newest<S: Storage>(store: &SessionStore<S>) {
    let group = SessionId::generate();
    let mut ids = Vec::new();
    for i in 0..10 {
        let id = SessionId::generate();
        store
            .set_session(&id, Some(group.into()), &i)
            .await
            .unwrap();
        ids.push(id);
    }

    let members = store.group_members(group).await.unwrap();
    let expected: Vec<Membership> = ids[5..]
        .iter()
        .map(|id| store.keys().membership(id))
        .collect();
    assert_eq!(members, expected);

    for id in &ids[..5] {
        assert!(matches!(
            store.session::<i32>(id).await,
            Err(Error::SessionNotFound)
        ));
        assert!(store
            .storage()
            .get(&store.keys().session_to_group_key(id))
            .await
            .unwrap()
            .is_none());
    }
    for (i, id) in ids.iter().enumerate().skip(5) {
        assert_eq!(store.session::<i32>(id).await.unwrap(), i as i32);
    }
    store.invalidate_sessions(group).await.unwrap();
}

pub async fn invalidation_clears_group<S: Storage>(store: &SessionStore<S>) {
    let group = format!("user-{}", SessionId::generate());
    let ids: Vec<SessionId> = (0..3).map(|_| SessionId::generate()).collect();
    for id in &ids {
        store
            .set_session(id, Some(group.as_str().into()), &login(&group))
            .await
            .unwrap();
    }
    let outsider = SessionId::generate();
    store.set_session(&outsider, None, &login("x")).await.unwrap();

    store.invalidate_sessions(group.as_str()).await.unwrap();

    for id in &ids {
        assert!(matches!(
            store.session::<Login>(id).await,
            Err(Error::SessionNotFound)
        ));
        let pointer = store.keys().session_to_group_key(id);
        assert!(store.storage().get(&pointer).await.unwrap().is_none());
    }
    assert_eq!(store.storage().zcard(&store.keys().group_key(&group)).await.unwrap(), 0);
    assert!(store.session::<Login>(&outsider).await.is_ok());

    // Invalidating an unknown group is a no-op.
    store.invalidate_sessions("nobody").await.unwrap();
}

pub async fn delete_is_idempotent<S: Storage>(store: &SessionStore<S>) {
    let never = SessionId::generate();
    store.delete_session(&never).await.unwrap();

    let id = SessionId::generate();
    store
        .set_session(&id, Some("idempotent".into()), &1)
        .await
        .unwrap();
    store.delete_session(&id).await.unwrap();
    store.delete_session(&id).await.unwrap();
    assert!(matches!(
        store.session::<i32>(&id).await,
        Err(Error::SessionNotFound)
    ));
}

pub async fn corrupt_payload_is_distinct<S: Storage>(store: &SessionStore<S>) {
    let id = SessionId::generate();
    store
        .storage()
        .set_px(&store.keys().session_key(&id), b"\xff not json", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(matches!(
        store.session::<Login>(&id).await,
        Err(Error::CorruptSession(_))
    ));
}

pub async fn group_keys_share_session_ttl<S: Storage>(store: &SessionStore<S>, ttl: Duration) {
    let id = SessionId::generate();
    let group = format!("ttl-{id}");
    store
        .set_session(&id, Some(group.as_str().into()), &1)
        .await
        .unwrap();
    assert_eq!(store.session::<i32>(&id).await.unwrap(), 1);

    tokio::time::sleep(ttl + Duration::from_millis(100)).await;

    assert!(matches!(
        store.session::<i32>(&id).await,
        Err(Error::SessionNotFound)
    ));
    let storage = store.storage();
    assert!(storage
        .get(&store.keys().session_to_group_key(&id))
        .await
        .unwrap()
        .is_none());
    assert_eq!(storage.zcard(&store.keys().group_key(&group)).await.unwrap(), 0);
}

pub async fn token_bucket_refills<S: Storage>(store: &SessionStore<S>) {
    let client = format!("client-{}", SessionId::generate());
    // Ten tokens per second: one token back after 100ms.
    store.consume(&client, 10.0, 1.0).await.unwrap();
    assert!(matches!(
        store.consume(&client, 10.0, 1.0).await,
        Err(Error::RateLimitExceeded)
    ));
    tokio::time::sleep(Duration::from_millis(150)).await;
    store.consume(&client, 10.0, 1.0).await.unwrap();
}

pub async fn token_bucket_allows_bursts<S: Storage>(store: &SessionStore<S>) {
    let client = format!("burst-{}", SessionId::generate());
    for _ in 0..3 {
        store.consume(&client, 0.5, 3.0).await.unwrap();
    }
    assert!(matches!(
        store.consume(&client, 0.5, 3.0).await,
        Err(Error::RateLimitExceeded)
    ));
}

/// Many callers race for a bucket of five; exactly five must win.
pub async fn token_bucket_is_atomic<S: Storage>(store: &SessionStore<S>) {
    let client = format!("race-{}", SessionId::generate());
    let mut tasks = Vec::new();
    for _ in 0..40 {
        let store = store.clone();
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            store.consume(&client, 0.001, 5.0).await
        }));
    }
    let mut allowed = 0;
    for task in futures::future::join_all(tasks).await {
        match task.unwrap() {
            Ok(()) => allowed += 1,
            Err(Error::RateLimitExceeded) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(allowed, 5);
}
