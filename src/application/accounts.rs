use crate::application::lock::LockCoordinator;
use crate::config::EngineConfig;
use crate::domain::account::{Account, AccountNumber, AccountUser, Balance};
use crate::domain::ports::{ClockHandle, StoreHandle};
use crate::error::{LedgerError, Result};
use tracing::info;

/// Lock key serializing account-number allocation.
const ACCOUNT_NUMBER_LOCK: &str = "account-number-sequence";

/// Opens, closes and lists accounts.
///
/// Closing shares the per-account lock with the transaction engine, so an
/// account can never be closed halfway through a use or cancel.
pub struct AccountService {
    store: StoreHandle,
    locks: LockCoordinator,
    clock: ClockHandle,
    max_accounts_per_user: usize,
}

impl AccountService {
    pub fn new(
        store: StoreHandle,
        locks: LockCoordinator,
        clock: ClockHandle,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            locks,
            clock,
            max_accounts_per_user: config.max_accounts_per_user,
        }
    }

    pub async fn create_user(&self, name: &str) -> Result<AccountUser> {
        let user = self.store.insert_user(name).await?;
        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Opens an account numbered one past the last issued number.
    pub async fn create_account(&self, user_id: u64, initial_balance: Balance) -> Result<Account> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        self.locks
            .with_lock(ACCOUNT_NUMBER_LOCK, || async {
                let owned = self.store.accounts_by_owner(user_id).await?.len();
                if owned >= self.max_accounts_per_user {
                    return Err(LedgerError::MaxAccountsPerUser {
                        user_id,
                        limit: self.max_accounts_per_user,
                    });
                }

                let number = match self.store.last_account_number().await? {
                    Some(last) => last.successor()?,
                    None => AccountNumber::first(),
                };
                let account = self
                    .store
                    .insert_account(user_id, number, initial_balance, self.clock.now())
                    .await?;
                info!(account = %account.account_number, user_id, balance = %initial_balance, "account opened");
                Ok(account)
            })
            .await
    }

    /// Closes an empty account owned by `user_id`.
    pub async fn close_account(&self, user_id: u64, account_number: &AccountNumber) -> Result<Account> {
        self.locks
            .with_lock(account_number.as_str(), || async {
                self.store
                    .get_user(user_id)
                    .await?
                    .ok_or(LedgerError::UserNotFound(user_id))?;
                let mut account = self
                    .store
                    .get_account(account_number)
                    .await?
                    .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;

                account.close(user_id, self.clock.now())?;
                self.store.update_account(account.clone()).await?;
                info!(account = %account_number, user_id, "account closed");
                Ok(account)
            })
            .await
    }

    pub async fn accounts_of(&self, user_id: u64) -> Result<Vec<Account>> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;
        self.store.accounts_by_owner(user_id).await
    }
}
