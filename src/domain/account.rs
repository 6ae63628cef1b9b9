use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents an account balance in minor currency units.
///
/// A balance is never negative. Arithmetic is checked and fails with
/// [`LedgerError::AmountOverflow`] instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Balance(i64);

/// Represents a positive monetary amount for a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(LedgerError::InvalidAmount(value))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(0);

    pub fn new(value: i64) -> Result<Self> {
        if value >= 0 {
            Ok(Self(value))
        } else {
            Err(LedgerError::InvalidAmount(value))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, amount: Amount) -> Result<Self> {
        if amount.0 > self.0 {
            return Err(LedgerError::InsufficientBalance {
                balance: self.0,
                requested: amount.0,
            });
        }
        self.0
            .checked_sub(amount.0)
            .map(Self)
            .ok_or(LedgerError::AmountOverflow)
    }

    pub fn checked_add(self, amount: Amount) -> Result<Self> {
        self.0
            .checked_add(amount.0)
            .map(Self)
            .ok_or(LedgerError::AmountOverflow)
    }
}

impl TryFrom<i64> for Balance {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Balance> for i64 {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Closed,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Active => f.write_str("active"),
            AccountStatus::Closed => f.write_str("closed"),
        }
    }
}

/// First number handed out when no account exists yet.
pub const FIRST_ACCOUNT_NUMBER: u64 = 1_000_000_000;

/// Ten-digit account number, the stable external key of an account and the
/// lock key for every mutation on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

impl AccountNumber {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.len() == 10 && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(LedgerError::InvalidAccountNumber(raw.to_string()))
        }
    }

    pub fn first() -> Self {
        Self(FIRST_ACCOUNT_NUMBER.to_string())
    }

    /// The number issued after this one.
    pub fn successor(&self) -> Result<Self> {
        let current: u64 = self
            .0
            .parse()
            .map_err(|_| LedgerError::InvalidAccountNumber(self.0.clone()))?;
        let next = current
            .checked_add(1)
            .filter(|n| *n <= 9_999_999_999)
            .ok_or_else(|| LedgerError::InvalidAccountNumber(format!("{current}+1")))?;
        Ok(Self(next.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AccountNumber> for String {
    fn from(number: AccountNumber) -> Self {
        number.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The owner of one or more accounts.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct AccountUser {
    pub id: u64,
    pub name: String,
}

/// Represents the state of a balance-holding account.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Account {
    pub id: u64,
    /// External key, also used as the lock key.
    pub account_number: AccountNumber,
    pub owner_id: u64,
    pub status: AccountStatus,
    pub balance: Balance,
    /// Balance the account was opened with; the ledger replays from here.
    pub initial_balance: Balance,
    pub registered_at: DateTime<Utc>,
    pub unregistered_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(
        id: u64,
        account_number: AccountNumber,
        owner_id: u64,
        balance: Balance,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            account_number,
            owner_id,
            status: AccountStatus::Active,
            balance,
            initial_balance: balance,
            registered_at,
            unregistered_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Checks every precondition of a use and returns the resulting balance.
    ///
    /// The account itself is left untouched; the caller commits the new
    /// balance together with the ledger record.
    pub fn validate_use(&self, user_id: u64, amount: Amount) -> Result<Balance> {
        if self.owner_id != user_id {
            return Err(LedgerError::OwnerMismatch {
                user_id,
                account_number: self.account_number.to_string(),
            });
        }
        self.ensure_active()?;
        self.balance.checked_sub(amount)
    }

    /// Returns the balance after crediting back a cancelled amount.
    pub fn validate_cancel(&self, amount: Amount) -> Result<Balance> {
        self.ensure_active()?;
        self.balance.checked_add(amount)
    }

    /// Marks the account closed. Only an empty, active account can be closed.
    pub fn close(&mut self, user_id: u64, at: DateTime<Utc>) -> Result<()> {
        if self.owner_id != user_id {
            return Err(LedgerError::OwnerMismatch {
                user_id,
                account_number: self.account_number.to_string(),
            });
        }
        self.ensure_active()?;
        if !self.balance.is_zero() {
            return Err(LedgerError::BalanceNotEmpty(self.account_number.to_string()));
        }
        self.status = AccountStatus::Closed;
        self.unregistered_at = Some(at);
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(LedgerError::AccountClosed(self.account_number.to_string()))
        }
    }
}
