use super::account::{AccountNumber, Amount, Balance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, globally unique ledger identifier: a v4 UUID rendered as 32 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransactionId {
    fn from(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }
}

impl From<String> for TransactionId {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Use,
    Cancel,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Use => f.write_str("use"),
            TransactionType::Cancel => f.write_str("cancel"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum TransactionResult {
    #[serde(rename = "S")]
    Success,
    #[serde(rename = "F")]
    Failed,
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionResult::Success => f.write_str("S"),
            TransactionResult::Failed => f.write_str("F"),
        }
    }
}

/// A ledger record before the store has assigned its identifier.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NewTransaction {
    pub account_number: AccountNumber,
    pub transaction_type: TransactionType,
    pub result: TransactionResult,
    pub amount: Amount,
    /// Balance right after this record's effect; unchanged for failed attempts.
    pub balance_snapshot: Balance,
    pub transacted_at: DateTime<Utc>,
    /// For a successful cancel, the use it reverses.
    pub cancels: Option<TransactionId>,
}

impl NewTransaction {
    pub fn into_transaction(self, transaction_id: TransactionId) -> Transaction {
        Transaction {
            transaction_id,
            account_number: self.account_number,
            transaction_type: self.transaction_type,
            result: self.result,
            amount: self.amount,
            balance_snapshot: self.balance_snapshot,
            transacted_at: self.transacted_at,
            cancelled_by: None,
        }
    }
}

/// An append-only ledger entry, written once per use or cancel attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub account_number: AccountNumber,
    pub transaction_type: TransactionType,
    pub result: TransactionResult,
    pub amount: Amount,
    pub balance_snapshot: Balance,
    pub transacted_at: DateTime<Utc>,
    /// Set once, when a successful cancel reverses this use.
    #[serde(default)]
    pub cancelled_by: Option<TransactionId>,
}

impl Transaction {
    pub fn is_success(&self) -> bool {
        self.result == TransactionResult::Success
    }

    /// Signed effect of this record on the account balance.
    pub fn balance_delta(&self) -> i128 {
        match (self.result, self.transaction_type) {
            (TransactionResult::Failed, _) => 0,
            (TransactionResult::Success, TransactionType::Use) => -i128::from(self.amount.value()),
            (TransactionResult::Success, TransactionType::Cancel) => {
                i128::from(self.amount.value())
            }
        }
    }
}
