use crate::domain::account::Account;
use crate::domain::transaction::Transaction;
use crate::error::{LedgerError, Result};
use serde::Serialize;
use std::io::Write;

/// Outcome of one script line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    pub line: usize,
    pub op: String,
    pub account: String,
    /// `S`/`F` for ledger operations, `ok`/`error` otherwise.
    pub result: String,
    pub transaction_id: String,
    pub amount: String,
    pub detail: String,
}

impl ResultRow {
    pub fn from_transaction(line: usize, op: &str, tx: &Transaction) -> Self {
        Self {
            line,
            op: op.to_string(),
            account: tx.account_number.to_string(),
            result: tx.result.to_string(),
            transaction_id: tx.transaction_id.to_string(),
            amount: tx.amount.to_string(),
            detail: format!("{} balance={}", tx.transaction_type, tx.balance_snapshot),
        }
    }

    pub fn ok(line: usize, op: &str, account: String, detail: String) -> Self {
        Self {
            line,
            op: op.to_string(),
            account,
            result: "ok".into(),
            transaction_id: String::new(),
            amount: String::new(),
            detail,
        }
    }

    pub fn error(line: usize, op: &str, account: String, error: &LedgerError) -> Self {
        Self {
            line,
            op: op.to_string(),
            account,
            result: "error".into(),
            transaction_id: String::new(),
            amount: String::new(),
            detail: error.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AccountRow<'a> {
    account: &'a str,
    owner: u64,
    status: String,
    balance: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    JsonLines,
}

/// Writes per-line results followed by the final account table.
pub struct ReportWriter<W: Write> {
    out: W,
    format: ReportFormat,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W, format: ReportFormat) -> Self {
        Self { out, format }
    }

    pub fn write_results(&mut self, rows: &[ResultRow]) -> Result<()> {
        self.write_all(rows)
    }

    pub fn write_accounts(&mut self, accounts: &[Account]) -> Result<()> {
        let rows: Vec<AccountRow<'_>> = accounts
            .iter()
            .map(|a| AccountRow {
                account: a.account_number.as_str(),
                owner: a.owner_id,
                status: a.status.to_string(),
                balance: a.balance.value(),
            })
            .collect();
        self.write_all(&rows)
    }

    fn write_all<T: Serialize>(&mut self, rows: &[T]) -> Result<()> {
        match self.format {
            ReportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(&mut self.out);
                for row in rows {
                    writer.serialize(row)?;
                }
                writer.flush()?;
            }
            ReportFormat::JsonLines => {
                for row in rows {
                    serde_json::to_writer(&mut self.out, row)?;
                    writeln!(self.out)?;
                }
            }
        }
        Ok(())
    }
}
