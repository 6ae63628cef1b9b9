//! Keyed lease lock shared through Redis, for processes that share one store.
//!
//! A lease is a Redis key set with `SET key token NX PX lease`, so it expires
//! on its own if the holder dies. Release deletes the key only while it still
//! holds the caller's token; a late release after expiry is a no-op.

use crate::domain::ports::{LockProvider, LockToken};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

const KEY_PREFIX: &str = "ledger:lock:";
const BACKOFF_BASE: Duration = Duration::from_millis(5);
const BACKOFF_MAX: Duration = Duration::from_millis(100);

const RELEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

#[derive(Clone)]
pub struct RedisLockProvider {
    conn_manager: ConnectionManager,
}

impl RedisLockProvider {
    /// Connects to Redis at `redis_url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self { conn_manager })
    }

    fn lock_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    async fn try_acquire(&self, key: &str, token: &LockToken, lease: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(key))
            .arg(&token.0)
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=5))
}

#[async_trait]
impl LockProvider for RedisLockProvider {
    async fn acquire(&self, key: &str, wait: Duration, lease: Duration) -> Result<LockToken> {
        let deadline = Instant::now() + wait;
        let token = LockToken(Uuid::new_v4().simple().to_string());
        let mut backoff = BACKOFF_BASE;

        loop {
            if self.try_acquire(key, &token, lease).await? {
                return Ok(token);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::LockUnavailable(key.to_string()));
            }
            tokio::time::sleep((backoff + jitter()).min(deadline - now)).await;
            backoff = backoff.saturating_mul(2).min(BACKOFF_MAX);
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(Self::lock_key(key))
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            debug!(key, %token, "release of expired or foreign lease ignored");
        }
        Ok(())
    }
}
