use crate::config::LockConfig;
use crate::domain::ports::{LockProviderHandle, LockToken};
use crate::error::Result;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Runs operations while holding a keyed lock from a [`LockProvider`].
///
/// The lock is acquired before the operation starts and released exactly once
/// after it finishes, whatever the outcome: success, error, or panic (the
/// panic is resumed after release). If the caller drops the future while the
/// operation is in flight, the release is handed to the runtime instead.
///
/// [`LockProvider`]: crate::domain::ports::LockProvider
#[derive(Clone)]
pub struct LockCoordinator {
    provider: LockProviderHandle,
    config: LockConfig,
}

impl LockCoordinator {
    pub fn new(provider: LockProviderHandle, config: LockConfig) -> Self {
        Self { provider, config }
    }

    /// Runs `op` under the lock for `key` using the configured timeouts.
    ///
    /// Fails with `LockUnavailable` without invoking `op` if the lock cannot
    /// be obtained within the wait timeout.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.with_lock_timeouts(key, self.config.wait_timeout, self.config.lease_timeout, op)
            .await
    }

    pub async fn with_lock_timeouts<T, F, Fut>(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.provider.acquire(key, wait, lease).await?;
        debug!(key, "lock acquired");
        let guard = ReleaseGuard {
            provider: self.provider.clone(),
            key: key.to_string(),
            token,
            armed: true,
        };

        let outcome = AssertUnwindSafe(async move { op().await })
            .catch_unwind()
            .await;
        guard.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

struct ReleaseGuard {
    provider: LockProviderHandle,
    key: String,
    token: LockToken,
    armed: bool,
}

impl ReleaseGuard {
    async fn release(mut self) {
        if let Err(e) = self.provider.release(&self.key, &self.token).await {
            error!(key = %self.key, error = %e, "failed to release lock");
        } else {
            debug!(key = %self.key, "lock released");
        }
        self.armed = false;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let provider = self.provider.clone();
        let key = std::mem::take(&mut self.key);
        let token = self.token.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = provider.release(&key, &token).await {
                        error!(%key, error = %e, "failed to release abandoned lock");
                    }
                });
            }
            Err(_) => warn!(%key, "no runtime to release lock; leaving it to lease expiry"),
        }
    }
}
