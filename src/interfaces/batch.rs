use crate::application::accounts::AccountService;
use crate::application::engine::{Attempt, TransactionEngine};
use crate::domain::account::{Account, AccountNumber};
use crate::domain::transaction::TransactionId;
use crate::error::{LedgerError, Result};
use crate::interfaces::csv::command_reader::{Command, TransactionRef};
use crate::interfaces::csv::report_writer::ResultRow;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Executes script commands one by one against the engine and the account
/// service, remembering which ledger record each line produced.
pub struct BatchRunner<'a> {
    engine: &'a TransactionEngine,
    accounts: &'a AccountService,
    produced: HashMap<usize, TransactionId>,
    touched: BTreeSet<AccountNumber>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(engine: &'a TransactionEngine, accounts: &'a AccountService) -> Self {
        Self {
            engine,
            accounts,
            produced: HashMap::new(),
            touched: BTreeSet::new(),
        }
    }

    /// Runs one command. Rejections become error rows; they never stop the batch.
    pub async fn run(&mut self, line: usize, command: Command) -> ResultRow {
        let op = command.name();
        let account = match &command {
            Command::UseBalance { account_number, .. }
            | Command::CancelBalance { account_number, .. }
            | Command::CloseAccount { account_number, .. } => account_number.to_string(),
            _ => String::new(),
        };

        match self.execute(line, command).await {
            Ok(row) => row,
            Err(e) => {
                warn!(line, op, error = %e, "command failed");
                ResultRow::error(line, op, account, &e)
            }
        }
    }

    /// Reports a line that could not be parsed.
    pub fn reject(&self, line: usize, error: &LedgerError) -> ResultRow {
        warn!(line, error = %error, "unreadable command");
        ResultRow::error(line, "?", String::new(), error)
    }

    async fn execute(&mut self, line: usize, command: Command) -> Result<ResultRow> {
        let op = command.name();
        match command {
            Command::RegisterUser { name } => {
                let user = self.accounts.create_user(&name).await?;
                Ok(ResultRow::ok(line, op, String::new(), format!("user={}", user.id)))
            }
            Command::OpenAccount {
                user_id,
                initial_balance,
            } => {
                let account = self.accounts.create_account(user_id, initial_balance).await?;
                self.touched.insert(account.account_number.clone());
                Ok(ResultRow::ok(
                    line,
                    op,
                    account.account_number.to_string(),
                    format!("balance={}", account.balance),
                ))
            }
            Command::UseBalance {
                user_id,
                account_number,
                amount,
            } => {
                self.touched.insert(account_number.clone());
                let attempt = self.engine.attempt_use(user_id, &account_number, amount).await;
                self.remember(line, attempt)
            }
            Command::CancelBalance {
                transaction,
                account_number,
                amount,
            } => {
                self.touched.insert(account_number.clone());
                let transaction_id = self.resolve(&transaction)?;
                let attempt = self
                    .engine
                    .attempt_cancel(&transaction_id, &account_number, amount)
                    .await;
                self.remember(line, attempt)
            }
            Command::CloseAccount {
                user_id,
                account_number,
            } => {
                let account = self.accounts.close_account(user_id, &account_number).await?;
                Ok(ResultRow::ok(
                    line,
                    op,
                    account.account_number.to_string(),
                    account.status.to_string(),
                ))
            }
            Command::QueryTransaction { transaction } => {
                let tx = self.engine.query_transaction(&self.resolve(&transaction)?).await?;
                Ok(ResultRow::from_transaction(line, op, &tx))
            }
        }
    }

    /// Records which transaction a use/cancel line produced. A rejected
    /// attempt counts only if its Failed record was actually written.
    fn remember(&mut self, line: usize, attempt: Attempt) -> Result<ResultRow> {
        match attempt {
            Ok(tx) => {
                self.produced.insert(line, tx.transaction_id.clone());
                let op = tx.transaction_type.to_string();
                Ok(ResultRow::from_transaction(line, &op, &tx))
            }
            Err(rejected) => {
                if let Some(failed) = rejected.failed {
                    self.produced.insert(line, failed.transaction_id);
                }
                Err(rejected.cause)
            }
        }
    }

    fn resolve(&self, reference: &TransactionRef) -> Result<TransactionId> {
        match reference {
            TransactionRef::Id(id) => Ok(id.clone()),
            TransactionRef::Line(n) => self.produced.get(n).cloned().ok_or_else(|| {
                LedgerError::InvalidCommand(format!("line {n} produced no transaction"))
            }),
        }
    }

    /// Final state of every account the script touched.
    pub async fn touched_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = Vec::with_capacity(self.touched.len());
        for number in &self.touched {
            if let Some(account) = self.engine.store().get_account(number).await? {
                accounts.push(account);
            }
        }
        Ok(accounts)
    }
}
