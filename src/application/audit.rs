use crate::domain::account::{AccountNumber, Balance};
use crate::domain::ports::LedgerStore;
use crate::error::{LedgerError, Result};

/// Result of replaying an account's ledger against its stored balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub account_number: AccountNumber,
    pub initial_balance: Balance,
    pub total_used: i128,
    pub total_cancelled: i128,
    pub failed_attempts: usize,
    pub expected_balance: i128,
    pub actual_balance: Balance,
}

impl AuditReport {
    /// initial − Σ successful uses + Σ successful cancels equals the balance,
    /// and the balance is not negative.
    pub fn is_consistent(&self) -> bool {
        self.expected_balance == i128::from(self.actual_balance.value())
            && self.expected_balance >= 0
    }
}

/// Recomputes the balance of `account_number` from its ledger, starting at
/// the balance the account was opened with.
pub async fn verify_account(
    store: &dyn LedgerStore,
    account_number: &AccountNumber,
) -> Result<AuditReport> {
    let account = store
        .get_account(account_number)
        .await?
        .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;
    let ledger = store.transactions_for_account(account_number).await?;

    let mut total_used = 0i128;
    let mut total_cancelled = 0i128;
    let mut failed_attempts = 0;
    for tx in &ledger {
        if !tx.is_success() {
            failed_attempts += 1;
        }
        match tx.balance_delta() {
            delta if delta < 0 => total_used -= delta,
            delta => total_cancelled += delta,
        }
    }

    Ok(AuditReport {
        account_number: account.account_number,
        initial_balance: account.initial_balance,
        total_used,
        total_cancelled,
        failed_attempts,
        expected_balance: i128::from(account.initial_balance.value()) - total_used
            + total_cancelled,
        actual_balance: account.balance,
    })
}
