//! Redis Adapters
//!
//! Lock backend and key/value store shared by every service instance that
//! points at the same Redis.
//!
//! Locks live under `lock:<key>` holding the owner's token with a
//! millisecond expiry. Store entries are written under their key as-is.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{KeyValueStore, LockBackend, LockToken};
use crate::error::Result;

const LOCK_PREFIX: &str = "lock:";

/// Deletes the lock only while it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Open a managed connection, reconnecting transparently on failure.
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;
    info!("Connected to Redis at {}", url);
    Ok(manager)
}

fn lock_key(key: &str) -> String {
    format!("{}{}", LOCK_PREFIX, key)
}

// =============================================================================
// Lock Backend
// =============================================================================

#[derive(Clone)]
pub struct RedisLockBackend {
    conn: ConnectionManager,
    release: Script,
    poll_interval: Duration,
}

impl RedisLockBackend {
    pub fn new(conn: ConnectionManager, poll_interval: Duration) -> Self {
        Self {
            conn,
            release: Script::new(RELEASE_SCRIPT),
            poll_interval,
        }
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn try_acquire(&self, key: &str, token: &LockToken, lease: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(lock_key(key))
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn wait_for_release(&self, key: &str, timeout: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = lock_key(key);
        let deadline = Instant::now() + timeout;

        loop {
            let held: bool = conn.exists(&key).await?;
            if !held {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!("{} still held after {:?}", key, timeout);
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

impl std::fmt::Debug for RedisLockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockBackend")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Key/Value Store
// =============================================================================

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}
