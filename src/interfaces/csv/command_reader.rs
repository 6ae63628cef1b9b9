use crate::domain::account::{AccountNumber, Amount, Balance};
use crate::domain::transaction::TransactionId;
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::io::Read;

/// Reference to a ledger record from a script: a literal id, or `@N` for the
/// record produced by script line `N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRef {
    Id(TransactionId),
    Line(usize),
}

impl TransactionRef {
    fn parse(raw: &str) -> Result<Self> {
        match raw.strip_prefix('@') {
            Some(line) => line
                .parse()
                .map(TransactionRef::Line)
                .map_err(|_| LedgerError::InvalidCommand(format!("bad line reference {raw:?}"))),
            None if !raw.is_empty() => Ok(TransactionRef::Id(TransactionId::from(raw))),
            None => Err(LedgerError::InvalidCommand("missing transaction".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RegisterUser {
        name: String,
    },
    OpenAccount {
        user_id: u64,
        initial_balance: Balance,
    },
    UseBalance {
        user_id: u64,
        account_number: AccountNumber,
        amount: Amount,
    },
    CancelBalance {
        transaction: TransactionRef,
        account_number: AccountNumber,
        amount: Amount,
    },
    CloseAccount {
        user_id: u64,
        account_number: AccountNumber,
    },
    QueryTransaction {
        transaction: TransactionRef,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::RegisterUser { .. } => "user",
            Command::OpenAccount { .. } => "open",
            Command::UseBalance { .. } => "use",
            Command::CancelBalance { .. } => "cancel",
            Command::CloseAccount { .. } => "close",
            Command::QueryTransaction { .. } => "query",
        }
    }
}

/// Raw CSV shape; validated into a [`Command`].
#[derive(Debug, Deserialize)]
struct CommandRow {
    op: String,
    user: Option<String>,
    account: Option<String>,
    tx: Option<String>,
    amount: Option<i64>,
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LedgerError::InvalidCommand(format!("missing {name}")))
}

fn user_id(row: &CommandRow) -> Result<u64> {
    let raw = required(&row.user, "user")?;
    raw.parse()
        .map_err(|_| LedgerError::InvalidCommand(format!("bad user id {raw:?}")))
}

fn account(row: &CommandRow) -> Result<AccountNumber> {
    AccountNumber::parse(required(&row.account, "account")?)
}

fn amount(row: &CommandRow) -> Result<Amount> {
    Amount::new(
        row.amount
            .ok_or_else(|| LedgerError::InvalidCommand("missing amount".into()))?,
    )
}

impl TryFrom<CommandRow> for Command {
    type Error = LedgerError;

    fn try_from(row: CommandRow) -> Result<Self> {
        let command = match row.op.trim().to_ascii_lowercase().as_str() {
            "user" => Command::RegisterUser {
                name: required(&row.user, "user name")?.to_string(),
            },
            "open" => Command::OpenAccount {
                user_id: user_id(&row)?,
                initial_balance: Balance::new(row.amount.unwrap_or(0))?,
            },
            "use" => Command::UseBalance {
                user_id: user_id(&row)?,
                account_number: account(&row)?,
                amount: amount(&row)?,
            },
            "cancel" => Command::CancelBalance {
                transaction: TransactionRef::parse(required(&row.tx, "transaction")?)?,
                account_number: account(&row)?,
                amount: amount(&row)?,
            },
            "close" => Command::CloseAccount {
                user_id: user_id(&row)?,
                account_number: account(&row)?,
            },
            "query" => Command::QueryTransaction {
                transaction: TransactionRef::parse(required(&row.tx, "transaction")?)?,
            },
            other => {
                return Err(LedgerError::InvalidCommand(format!(
                    "unknown operation {other:?}"
                )));
            }
        };
        Ok(command)
    }
}

/// Reads a command script from a CSV source with header
/// `op, user, account, tx, amount`.
///
/// Rows are trimmed and may omit trailing empty columns. Each item carries its
/// 1-based line number (header excluded), which `@N` references point at.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates commands.
    pub fn commands(self) -> impl Iterator<Item = (usize, Result<Command>)> {
        self.reader
            .into_deserialize::<CommandRow>()
            .enumerate()
            .map(|(index, row)| {
                let command = row
                    .map_err(LedgerError::from)
                    .and_then(Command::try_from);
                (index + 1, command)
            })
    }
}
