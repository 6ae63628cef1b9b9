//! Keyed lease lock for request handlers sharing one process.
//!
//! Each key maps to at most one live lease `(token, expires_at)`. An expired
//! lease is taken over by the next acquirer, so a stalled holder blocks others
//! for at most its lease. Waiters are woken on release and otherwise poll with
//! capped, jittered backoff so they notice expiry too.
//!
//! Leases live in this process only. Processes sharing one store must use a
//! shared backend instead (see `redis_lock`, feature `lock-redis`).

use crate::domain::ports::{LockProvider, LockToken};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

const BACKOFF_BASE: Duration = Duration::from_millis(2);
const BACKOFF_MAX: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Lease {
    token: LockToken,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct LeaseLockProvider {
    leases: Mutex<HashMap<String, Lease>>,
    released: Notify,
}

impl LeaseLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` currently has an unexpired holder.
    pub async fn is_held(&self, key: &str) -> bool {
        let leases = self.leases.lock().await;
        leases
            .get(key)
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }

    /// One attempt. On contention returns how long the current lease has left.
    async fn try_acquire(&self, key: &str, lease: Duration) -> std::result::Result<LockToken, Duration> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        if let Some(current) = leases.get(key)
            && current.expires_at > now
        {
            return Err(current.expires_at - now);
        }
        if leases.contains_key(key) {
            debug!(key, "taking over expired lease");
        }
        let token = LockToken(Uuid::new_v4().simple().to_string());
        leases.insert(
            key.to_string(),
            Lease {
                token: token.clone(),
                expires_at: now + lease,
            },
        );
        Ok(token)
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=3))
}

#[async_trait]
impl LockProvider for LeaseLockProvider {
    async fn acquire(&self, key: &str, wait: Duration, lease: Duration) -> Result<LockToken> {
        let deadline = Instant::now() + wait;
        let mut backoff = BACKOFF_BASE;

        loop {
            // Register interest before checking so a release in between is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let remaining_lease = match self.try_acquire(key, lease).await {
                Ok(token) => return Ok(token),
                Err(remaining) => remaining,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::LockUnavailable(key.to_string()));
            }

            let delay = (backoff + jitter())
                .min(deadline - now)
                .min(remaining_lease);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(delay) => {}
            }
            backoff = backoff.saturating_mul(2).min(BACKOFF_MAX);
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<()> {
        let mut leases = self.leases.lock().await;
        match leases.get(key) {
            Some(current) if current.token == *token => {
                leases.remove(key);
                drop(leases);
                self.released.notify_waiters();
            }
            _ => debug!(key, %token, "release of expired or foreign lease ignored"),
        }
        Ok(())
    }
}
