use super::account::{Account, AccountNumber, AccountUser, Balance};
use super::transaction::{NewTransaction, Transaction, TransactionId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Keyed lookups and writes for users and accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_user(&self, user_id: u64) -> Result<Option<AccountUser>>;
    /// Registers a user and assigns its identifier.
    async fn insert_user(&self, name: &str) -> Result<AccountUser>;
    async fn get_account(&self, account_number: &AccountNumber) -> Result<Option<Account>>;
    async fn accounts_by_owner(&self, user_id: u64) -> Result<Vec<Account>>;
    /// The highest account number issued so far.
    async fn last_account_number(&self) -> Result<Option<AccountNumber>>;
    /// Persists a new account and assigns its identifier.
    async fn insert_account(
        &self,
        owner_id: u64,
        account_number: AccountNumber,
        balance: Balance,
        registered_at: DateTime<Utc>,
    ) -> Result<Account>;
    async fn update_account(&self, account: Account) -> Result<()>;
}

/// The append-only ledger, sharing its atomicity domain with the accounts.
#[async_trait]
pub trait LedgerStore: AccountStore {
    async fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<Transaction>>;

    /// Appends a record without touching any balance. Used for failed attempts.
    async fn append_transaction(&self, record: NewTransaction) -> Result<Transaction>;

    /// Writes `new_balance` to the account and appends `record` as one atomic
    /// unit. When the record cancels an earlier use, that use is marked
    /// cancelled in the same unit.
    async fn commit_balance_and_transaction(
        &self,
        account_number: &AccountNumber,
        new_balance: Balance,
        record: NewTransaction,
    ) -> Result<Transaction>;

    /// All records of one account, in append order.
    async fn transactions_for_account(
        &self,
        account_number: &AccountNumber,
    ) -> Result<Vec<Transaction>>;
}

pub type StoreHandle = Arc<dyn LedgerStore>;

/// Proof of lock ownership, handed back on release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(pub String);

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A mutex keyed by an arbitrary string, shared by every request handler.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Waits at most `wait` for `key`. The returned ownership lapses after
    /// `lease` unless released earlier.
    async fn acquire(&self, key: &str, wait: Duration, lease: Duration) -> Result<LockToken>;

    /// Idempotent. Releasing an expired or foreign token is a no-op.
    async fn release(&self, key: &str, token: &LockToken) -> Result<()>;
}

pub type LockProviderHandle = Arc<dyn LockProvider>;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type ClockHandle = Arc<dyn Clock>;
