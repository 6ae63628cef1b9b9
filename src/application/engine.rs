use crate::application::lock::LockCoordinator;
use crate::config::EngineConfig;
use crate::domain::account::{AccountNumber, Amount};
use crate::domain::ports::{ClockHandle, StoreHandle};
use crate::domain::transaction::{
    NewTransaction, Transaction, TransactionId, TransactionResult, TransactionType,
};
use crate::error::{LedgerError, Result};
use chrono::Months;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// A rejected use or cancel.
#[derive(Debug)]
pub struct Rejected {
    pub cause: LedgerError,
    /// The Failed record appended for this attempt. `None` when nothing was
    /// written: unknown account, lock or store failure.
    pub failed: Option<Transaction>,
}

pub type Attempt = std::result::Result<Transaction, Rejected>;

/// Validates and executes balance uses and cancellations.
///
/// Every mutation runs under the account's lock via [`LockCoordinator`]. Each
/// attempt that reaches an existing account leaves exactly one ledger record:
/// a Success record committed atomically with the new balance, or a Failed
/// record carrying the unchanged balance when validation rejects the request.
pub struct TransactionEngine {
    store: StoreHandle,
    locks: LockCoordinator,
    clock: ClockHandle,
    cancel_window: Months,
}

impl TransactionEngine {
    /// Creates a new `TransactionEngine`.
    ///
    /// # Arguments
    ///
    /// * `store` - Accounts, users and the ledger.
    /// * `locks` - Serializes mutations per account number.
    /// * `clock` - Timestamps records and evaluates the cancel window.
    /// * `config` - Supplies the cancel window.
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
            cancel_window: Months::new(config.cancel_window_months),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Spends `amount` from the account on behalf of its owner.
    pub async fn use_balance(
        &self,
        user_id: u64,
        account_number: &AccountNumber,
        amount: Amount,
    ) -> Result<Transaction> {
        self.attempt_use(user_id, account_number, amount)
            .await
            .map_err(|rejected| rejected.cause)
    }

    /// Like [`use_balance`](Self::use_balance), but a rejection also carries
    /// the Failed record it left in the ledger, if one was written.
    pub async fn attempt_use(
        &self,
        user_id: u64,
        account_number: &AccountNumber,
        amount: Amount,
    ) -> Attempt {
        let span = info_span!("use_balance", account = %account_number, user_id, amount = amount.value());
        let locked = self
            .locks
            .with_lock(account_number.as_str(), || async {
                Ok(match self.try_use(user_id, account_number, amount).await {
                    Ok(tx) => {
                        info!(transaction = %tx.transaction_id, balance = %tx.balance_snapshot, "balance used");
                        Ok(tx)
                    }
                    Err(e) => Err(self.reject(TransactionType::Use, account_number, amount, e).await),
                })
            })
            .instrument(span)
            .await;
        locked.unwrap_or_else(|cause| Err(Rejected { cause, failed: None }))
    }

    /// Fully reverses an earlier successful use on the same account.
    pub async fn cancel_balance(
        &self,
        transaction_id: &TransactionId,
        account_number: &AccountNumber,
        amount: Amount,
    ) -> Result<Transaction> {
        self.attempt_cancel(transaction_id, account_number, amount)
            .await
            .map_err(|rejected| rejected.cause)
    }

    /// Like [`cancel_balance`](Self::cancel_balance), reporting the Failed
    /// record of a rejection.
    pub async fn attempt_cancel(
        &self,
        transaction_id: &TransactionId,
        account_number: &AccountNumber,
        amount: Amount,
    ) -> Attempt {
        let span = info_span!("cancel_balance", account = %account_number, original = %transaction_id, amount = amount.value());
        let locked = self
            .locks
            .with_lock(account_number.as_str(), || async {
                Ok(match self.try_cancel(transaction_id, account_number, amount).await {
                    Ok(tx) => {
                        info!(transaction = %tx.transaction_id, balance = %tx.balance_snapshot, "use cancelled");
                        Ok(tx)
                    }
                    Err(e) => {
                        Err(self.reject(TransactionType::Cancel, account_number, amount, e).await)
                    }
                })
            })
            .instrument(span)
            .await;
        locked.unwrap_or_else(|cause| Err(Rejected { cause, failed: None }))
    }

    /// Read-only lookup; takes no lock.
    pub async fn query_transaction(&self, transaction_id: &TransactionId) -> Result<Transaction> {
        self.store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(transaction_id.to_string()))
    }

    /// Every record of an account, in the order it was written.
    pub async fn ledger(&self, account_number: &AccountNumber) -> Result<Vec<Transaction>> {
        if self.store.get_account(account_number).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account_number.to_string()));
        }
        self.store.transactions_for_account(account_number).await
    }

    async fn try_use(
        &self,
        user_id: u64,
        account_number: &AccountNumber,
        amount: Amount,
    ) -> Result<Transaction> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;
        let account = self
            .store
            .get_account(account_number)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;

        let new_balance = account.validate_use(user.id, amount)?;

        let record = NewTransaction {
            account_number: account.account_number.clone(),
            transaction_type: TransactionType::Use,
            result: TransactionResult::Success,
            amount,
            balance_snapshot: new_balance,
            transacted_at: self.clock.now(),
            cancels: None,
        };
        self.store
            .commit_balance_and_transaction(&account.account_number, new_balance, record)
            .await
    }

    async fn try_cancel(
        &self,
        transaction_id: &TransactionId,
        account_number: &AccountNumber,
        amount: Amount,
    ) -> Result<Transaction> {
        let original = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(transaction_id.to_string()))?;
        let account = self
            .store
            .get_account(account_number)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;

        if original.account_number != account.account_number {
            return Err(LedgerError::TransactionAccountMismatch {
                transaction_id: transaction_id.to_string(),
                account_number: account_number.to_string(),
            });
        }
        if original.transaction_type != TransactionType::Use || !original.is_success() {
            return Err(LedgerError::TransactionNotCancellable(transaction_id.to_string()));
        }
        if let Some(by) = &original.cancelled_by {
            return Err(LedgerError::TransactionAlreadyCancelled {
                transaction_id: transaction_id.to_string(),
                cancelled_by: by.to_string(),
            });
        }
        if original.amount != amount {
            return Err(LedgerError::CancelMustBeFull {
                original: original.amount.value(),
                requested: amount.value(),
            });
        }

        let now = self.clock.now();
        let cutoff = now
            .checked_sub_months(self.cancel_window)
            .ok_or_else(|| LedgerError::internal("cancel window cutoff out of range"))?;
        if original.transacted_at < cutoff {
            return Err(LedgerError::CancelWindowExpired(transaction_id.to_string()));
        }

        let new_balance = account.validate_cancel(amount)?;

        let record = NewTransaction {
            account_number: account.account_number.clone(),
            transaction_type: TransactionType::Cancel,
            result: TransactionResult::Success,
            amount,
            balance_snapshot: new_balance,
            transacted_at: now,
            cancels: Some(original.transaction_id),
        };
        self.store
            .commit_balance_and_transaction(&account.account_number, new_balance, record)
            .await
    }

    /// Appends the Failed record for a rejected attempt and hands back the
    /// original error with it. A failure to write that record is only logged.
    async fn reject(
        &self,
        transaction_type: TransactionType,
        account_number: &AccountNumber,
        amount: Amount,
        cause: LedgerError,
    ) -> Rejected {
        if !cause.is_rejection() {
            return Rejected { cause, failed: None };
        }
        warn!(error = %cause, "{transaction_type} rejected");

        if matches!(cause, LedgerError::AccountNotFound(_)) {
            debug!("no account to attach the failed record to");
            return Rejected { cause, failed: None };
        }

        let account = match self.store.get_account(account_number).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                error!("failed to record rejected {transaction_type}: account vanished");
                return Rejected { cause, failed: None };
            }
            Err(e) => {
                error!(error = %e, "failed to record rejected {transaction_type}");
                return Rejected { cause, failed: None };
            }
        };

        let record = NewTransaction {
            account_number: account.account_number,
            transaction_type,
            result: TransactionResult::Failed,
            amount,
            balance_snapshot: account.balance,
            transacted_at: self.clock.now(),
            cancels: None,
        };
        match self.store.append_transaction(record).await {
            Ok(failed) => Rejected {
                cause,
                failed: Some(failed),
            },
            Err(e) => {
                error!(error = %e, "failed to record rejected {transaction_type}");
                Rejected { cause, failed: None }
            }
        }
    }
}
