use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Coarse classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ResourceExhaustion,
    Concurrency,
    Integrity,
    Validation,
    Infra,
}

#[derive(Error, Diagnostic, Debug)]
pub enum LedgerError {
    #[error("user {0} not found")]
    #[diagnostic(code(ledger::user_not_found))]
    UserNotFound(u64),

    #[error("account {0} not found")]
    #[diagnostic(code(ledger::account_not_found))]
    AccountNotFound(String),

    #[error("transaction {0} not found")]
    #[diagnostic(code(ledger::transaction_not_found))]
    TransactionNotFound(String),

    #[error("account {account_number} is not owned by user {user_id}")]
    #[diagnostic(code(ledger::owner_mismatch))]
    OwnerMismatch { user_id: u64, account_number: String },

    #[error("account {0} is already closed")]
    #[diagnostic(code(ledger::account_closed))]
    AccountClosed(String),

    #[error("transaction {transaction_id} does not belong to account {account_number}")]
    #[diagnostic(code(ledger::transaction_account_mismatch))]
    TransactionAccountMismatch {
        transaction_id: String,
        account_number: String,
    },

    #[error("cancel amount {requested} must equal the original amount {original}")]
    #[diagnostic(
        code(ledger::cancel_must_be_full),
        help("partial cancellation is not supported")
    )]
    CancelMustBeFull { original: i64, requested: i64 },

    #[error("transaction {0} is too old to cancel")]
    #[diagnostic(code(ledger::cancel_window_expired))]
    CancelWindowExpired(String),

    #[error("transaction {0} is not a successful use and cannot be cancelled")]
    #[diagnostic(code(ledger::transaction_not_cancellable))]
    TransactionNotCancellable(String),

    #[error("transaction {transaction_id} was already cancelled by {cancelled_by}")]
    #[diagnostic(code(ledger::transaction_already_cancelled))]
    TransactionAlreadyCancelled {
        transaction_id: String,
        cancelled_by: String,
    },

    #[error("user {user_id} already owns the maximum of {limit} accounts")]
    #[diagnostic(code(ledger::max_accounts_per_user))]
    MaxAccountsPerUser { user_id: u64, limit: usize },

    #[error("account {0} still holds a balance and cannot be closed")]
    #[diagnostic(code(ledger::balance_not_empty))]
    BalanceNotEmpty(String),

    #[error("amount {requested} exceeds the balance {balance}")]
    #[diagnostic(code(ledger::insufficient_balance))]
    InsufficientBalance { balance: i64, requested: i64 },

    #[error("lock on {0} could not be acquired in time")]
    #[diagnostic(
        code(ledger::lock_unavailable),
        help("another request is working on this account; retry later")
    )]
    LockUnavailable(String),

    #[error("lock backend unavailable: {0}")]
    #[diagnostic(code(ledger::lock_backend))]
    LockBackend(String),

    #[error("balance arithmetic overflowed")]
    #[diagnostic(code(ledger::amount_overflow))]
    AmountOverflow,

    #[error("amount must be positive, got {0}")]
    #[diagnostic(code(ledger::invalid_amount))]
    InvalidAmount(i64),

    #[error("invalid account number: {0}")]
    #[diagnostic(code(ledger::invalid_account_number))]
    InvalidAccountNumber(String),

    #[error("invalid command: {0}")]
    #[diagnostic(code(ledger::invalid_command))]
    InvalidCommand(String),

    #[error("store unavailable: {0}")]
    #[diagnostic(code(ledger::store_unavailable))]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    #[diagnostic(code(ledger::internal))]
    InternalError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        use LedgerError::*;
        match self {
            UserNotFound(_) | AccountNotFound(_) | TransactionNotFound(_) => ErrorKind::NotFound,
            OwnerMismatch { .. }
            | AccountClosed(_)
            | TransactionAccountMismatch { .. }
            | CancelMustBeFull { .. }
            | CancelWindowExpired(_)
            | TransactionNotCancellable(_)
            | TransactionAlreadyCancelled { .. }
            | MaxAccountsPerUser { .. }
            | BalanceNotEmpty(_) => ErrorKind::Conflict,
            InsufficientBalance { .. } => ErrorKind::ResourceExhaustion,
            LockUnavailable(_) => ErrorKind::Concurrency,
            AmountOverflow => ErrorKind::Integrity,
            InvalidAmount(_) | InvalidAccountNumber(_) | InvalidCommand(_) => ErrorKind::Validation,
            LockBackend(_) | StoreUnavailable(_) | InternalError(_) => ErrorKind::Infra,
        }
    }

    /// Business-rule rejections, which still leave a Failed record in the ledger.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::Conflict
                | ErrorKind::ResourceExhaustion
                | ErrorKind::Integrity
        )
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        LedgerError::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::InternalError(Box::new(e))
    }
}

impl From<csv::Error> for LedgerError {
    fn from(e: csv::Error) -> Self {
        LedgerError::InternalError(Box::new(e))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::InternalError(Box::new(e))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        LedgerError::StoreUnavailable(e.into_string())
    }
}

#[cfg(feature = "lock-redis")]
impl From<redis::RedisError> for LedgerError {
    fn from(e: redis::RedisError) -> Self {
        LedgerError::LockBackend(e.to_string())
    }
}
