//! Command encodings shared by the standalone and cluster Redis backends.

use crate::bucket::{TakeToken, TOKEN_BUCKET_SCRIPT};
use crate::error::StoreError;
use deadpool_redis::redis::aio::ConnectionLike;
use deadpool_redis::redis::{self, Script};
use std::sync::LazyLock;
use std::time::Duration;

pub(crate) static TOKEN_BUCKET: LazyLock<Script> = LazyLock::new(|| Script::new(TOKEN_BUCKET_SCRIPT));

/// Deletes a group index and the keys named by its entries in one script.
///
/// KEYS[1] = group key
///
/// Returns the number of entries removed.
const INVALIDATE_GROUP_SCRIPT: &str = r#"
    local members = redis.call('ZRANGE', KEYS[1], 0, -1)
    for _, member in ipairs(members) do
        local sep = string.find(member, '|', 1, true)
        if sep then
            redis.call('DEL', string.sub(member, 1, sep - 1), string.sub(member, sep + 1))
        else
            redis.call('DEL', member)
        end
    end
    redis.call('DEL', KEYS[1])
    return #members
"#;

pub(crate) static INVALIDATE_GROUP: LazyLock<Script> =
    LazyLock::new(|| Script::new(INVALIDATE_GROUP_SCRIPT));

/// PX/PEXPIRE argument. Redis rejects anything past `i64::MAX` ms.
fn millis(ttl: Duration) -> Result<i64, StoreError> {
    i64::try_from(ttl.as_millis())
        .map(|ms| ms.max(1))
        .map_err(|_| StoreError::InvalidExpire(ttl))
}

pub(crate) async fn get<C: ConnectionLike + Send>(
    conn: &mut C,
    key: &str,
) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(redis::cmd("GET").arg(key).query_async(conn).await?)
}

pub(crate) async fn set_px<C: ConnectionLike + Send>(
    conn: &mut C,
    key: &str,
    value: &[u8],
    ttl: Duration,
) -> Result<(), StoreError> {
    let _: () = redis::cmd("SET")
        .arg(key)
        .arg(value)
        .arg("PX")
        .arg(millis(ttl)?)
        .query_async(conn)
        .await?;
    Ok(())
}

pub(crate) async fn del<C: ConnectionLike + Send>(
    conn: &mut C,
    keys: &[String],
) -> Result<u64, StoreError> {
    if keys.is_empty() {
        return Ok(0);
    }
    Ok(redis::cmd("DEL").arg(keys).query_async(conn).await?)
}

pub(crate) async fn zadd<C: ConnectionLike + Send>(
    conn: &mut C,
    key: &str,
    member: &str,
    score: f64,
) -> Result<(), StoreError> {
    let _: u64 = redis::cmd("ZADD")
        .arg(key)
        .arg(score)
        .arg(member)
        .query_async(conn)
        .await?;
    Ok(())
}

pub(crate) async fn zrem<C: ConnectionLike + Send>(
    conn: &mut C,
    key: &str,
    members: &[String],
) -> Result<u64, StoreError> {
    if members.is_empty() {
        return Ok(0);
    }
    Ok(redis::cmd("ZREM")
        .arg(key)
        .arg(members)
        .query_async(conn)
        .await?)
}

pub(crate) async fn zrange<C: ConnectionLike + Send>(
    conn: &mut C,
    key: &str,
    start: isize,
    stop: isize,
) -> Result<Vec<String>, StoreError> {
    Ok(redis::cmd("ZRANGE")
        .arg(key)
        .arg(start)
        .arg(stop)
        .query_async(conn)
        .await?)
}

pub(crate) async fn zcard<C: ConnectionLike + Send>(
    conn: &mut C,
    key: &str,
) -> Result<u64, StoreError> {
    Ok(redis::cmd("ZCARD").arg(key).query_async(conn).await?)
}

pub(crate) async fn pexpire<C: ConnectionLike + Send>(
    conn: &mut C,
    key: &str,
    ttl: Duration,
) -> Result<bool, StoreError> {
    Ok(redis::cmd("PEXPIRE")
        .arg(key)
        .arg(millis(ttl)?)
        .query_async(conn)
        .await?)
}

pub(crate) async fn take_token<C: ConnectionLike + Send>(
    conn: &mut C,
    key: &str,
    request: TakeToken,
) -> Result<bool, StoreError> {
    let ok: i64 = TOKEN_BUCKET
        .key(key)
        .arg(request.now_ns)
        .arg(request.rate_per_ns)
        .arg(request.capacity)
        .invoke_async(conn)
        .await?;
    match ok {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::UnexpectedReply(format!(
            "token bucket script returned {other}"
        ))),
    }
}

pub(crate) async fn invalidate_group<C: ConnectionLike + Send>(
    conn: &mut C,
    group_key: &str,
) -> Result<u64, StoreError> {
    Ok(INVALIDATE_GROUP.key(group_key).invoke_async(conn).await?)
}

pub(crate) async fn ping<C: ConnectionLike + Send>(conn: &mut C) -> Result<(), StoreError> {
    let pong: String = redis::cmd("PING").query_async(conn).await?;
    if pong != "PONG" {
        return Err(StoreError::UnexpectedReply(format!("PING returned {pong}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_arguments_stay_in_redis_range() {
        assert_eq!(millis(Duration::from_micros(10)).unwrap(), 1);
        assert_eq!(millis(Duration::from_secs(2)).unwrap(), 2000);
        assert_eq!(
            millis(Duration::from_millis(i64::MAX as u64)).unwrap(),
            i64::MAX
        );
        assert!(matches!(
            millis(Duration::from_secs(u64::MAX)),
            Err(StoreError::InvalidExpire(_))
        ));
    }
}
