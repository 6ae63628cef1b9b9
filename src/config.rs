use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts applied by the lock coordinator around every account mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long to wait for a busy account before giving up.
    pub wait_timeout: Duration,
    /// How long a holder may keep the lock before it lapses.
    pub lease_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(1),
            lease_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub lock: LockConfig,
    /// A use may be cancelled up to this many calendar months after it happened.
    pub cancel_window_months: u32,
    pub max_accounts_per_user: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            cancel_window_months: 12,
            max_accounts_per_user: 10,
        }
    }
}

impl EngineConfig {
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock.wait_timeout = wait;
        self
    }

    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock.lease_timeout = lease;
        self
    }

    pub fn with_cancel_window_months(mut self, months: u32) -> Self {
        self.cancel_window_months = months;
        self
    }

    pub fn with_max_accounts_per_user(mut self, limit: usize) -> Self {
        self.max_accounts_per_user = limit;
        self
    }
}
