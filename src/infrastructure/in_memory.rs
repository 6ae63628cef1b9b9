use crate::domain::account::{Account, AccountNumber, AccountUser, Balance};
use crate::domain::ports::{AccountStore, LedgerStore};
use crate::domain::transaction::{NewTransaction, Transaction, TransactionId};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    next_user_id: u64,
    next_account_id: u64,
    users: HashMap<u64, AccountUser>,
    accounts: BTreeMap<AccountNumber, Account>,
    transactions: HashMap<TransactionId, Transaction>,
    /// Append order per account.
    ledger: HashMap<AccountNumber, Vec<TransactionId>>,
}

impl State {
    fn append(&mut self, record: NewTransaction) -> Transaction {
        let tx = record.into_transaction(TransactionId::generate());
        self.ledger
            .entry(tx.account_number.clone())
            .or_default()
            .push(tx.transaction_id.clone());
        self.transactions
            .insert(tx.transaction_id.clone(), tx.clone());
        tx
    }
}

/// A thread-safe in-memory store for users, accounts and the ledger.
///
/// All maps live behind a single `RwLock`, so the balance update and the
/// ledger append of a commit are applied under one write guard and can never
/// be observed apart. Clones share the same state.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a ledger record verbatim, keeping its identifier and timestamp.
    ///
    /// Meant for seeding history (e.g. backdated transactions in tests).
    pub async fn import_transaction(&self, tx: Transaction) {
        let mut state = self.state.write().await;
        state
            .ledger
            .entry(tx.account_number.clone())
            .or_default()
            .push(tx.transaction_id.clone());
        state.transactions.insert(tx.transaction_id.clone(), tx);
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn get_user(&self, user_id: u64) -> Result<Option<AccountUser>> {
        let state = self.state.read().await;
        Ok(state.users.get(&user_id).cloned())
    }

    async fn insert_user(&self, name: &str) -> Result<AccountUser> {
        let mut state = self.state.write().await;
        state.next_user_id += 1;
        let user = AccountUser {
            id: state.next_user_id,
            name: name.to_string(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_account(&self, account_number: &AccountNumber) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(account_number).cloned())
    }

    async fn accounts_by_owner(&self, user_id: u64) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .filter(|a| a.owner_id == user_id)
            .cloned()
            .collect())
    }

    async fn last_account_number(&self) -> Result<Option<AccountNumber>> {
        let state = self.state.read().await;
        Ok(state.accounts.keys().next_back().cloned())
    }

    async fn insert_account(
        &self,
        owner_id: u64,
        account_number: AccountNumber,
        balance: Balance,
        registered_at: DateTime<Utc>,
    ) -> Result<Account> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account_number) {
            return Err(LedgerError::internal(format!(
                "account number {account_number} already issued"
            )));
        }
        state.next_account_id += 1;
        let account = Account::new(
            state.next_account_id,
            account_number,
            owner_id,
            balance,
            registered_at,
        );
        state
            .accounts
            .insert(account.account_number.clone(), account.clone());
        Ok(account)
    }

    async fn update_account(&self, account: Account) -> Result<()> {
        let mut state = self.state.write().await;
        match state.accounts.get_mut(&account.account_number) {
            Some(slot) => {
                *slot = account;
                Ok(())
            }
            None => Err(LedgerError::AccountNotFound(account.account_number.to_string())),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(transaction_id).cloned())
    }

    async fn append_transaction(&self, record: NewTransaction) -> Result<Transaction> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&record.account_number) {
            return Err(LedgerError::AccountNotFound(record.account_number.to_string()));
        }
        Ok(state.append(record))
    }

    async fn commit_balance_and_transaction(
        &self,
        account_number: &AccountNumber,
        new_balance: Balance,
        record: NewTransaction,
    ) -> Result<Transaction> {
        let mut state = self.state.write().await;

        // Validate everything before the first write so a failure leaves no trace.
        if !state.accounts.contains_key(account_number) {
            return Err(LedgerError::AccountNotFound(account_number.to_string()));
        }
        if let Some(original) = &record.cancels {
            match state.transactions.get(original) {
                None => return Err(LedgerError::TransactionNotFound(original.to_string())),
                Some(tx) => {
                    if let Some(by) = &tx.cancelled_by {
                        return Err(LedgerError::TransactionAlreadyCancelled {
                            transaction_id: original.to_string(),
                            cancelled_by: by.to_string(),
                        });
                    }
                }
            }
        }

        let cancels = record.cancels.clone();
        let tx = state.append(record);
        if let Some(original) = cancels
            && let Some(orig) = state.transactions.get_mut(&original)
        {
            orig.cancelled_by = Some(tx.transaction_id.clone());
        }
        if let Some(account) = state.accounts.get_mut(account_number) {
            account.balance = new_balance;
        }
        Ok(tx)
    }

    async fn transactions_for_account(
        &self,
        account_number: &AccountNumber,
    ) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .get(account_number)
            .into_iter()
            .flatten()
            .filter_map(|id| state.transactions.get(id).cloned())
            .collect())
    }
}

/// Delegates to an [`InMemoryStore`] but refuses plain appends, so the
/// compensating Failed record can never be written.
#[cfg(test)]
pub(crate) struct AppendFailingStore(pub InMemoryStore);

#[cfg(test)]
#[async_trait]
impl AccountStore for AppendFailingStore {
    async fn get_user(&self, user_id: u64) -> Result<Option<AccountUser>> {
        self.0.get_user(user_id).await
    }
    async fn insert_user(&self, name: &str) -> Result<AccountUser> {
        self.0.insert_user(name).await
    }
    async fn get_account(&self, n: &AccountNumber) -> Result<Option<Account>> {
        self.0.get_account(n).await
    }
    async fn accounts_by_owner(&self, user_id: u64) -> Result<Vec<Account>> {
        self.0.accounts_by_owner(user_id).await
    }
    async fn last_account_number(&self) -> Result<Option<AccountNumber>> {
        self.0.last_account_number().await
    }
    async fn insert_account(
        &self,
        owner_id: u64,
        n: AccountNumber,
        balance: Balance,
        at: DateTime<Utc>,
    ) -> Result<Account> {
        self.0.insert_account(owner_id, n, balance, at).await
    }
    async fn update_account(&self, account: Account) -> Result<()> {
        self.0.update_account(account).await
    }
}

#[cfg(test)]
#[async_trait]
impl LedgerStore for AppendFailingStore {
    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        self.0.get_transaction(id).await
    }
    async fn append_transaction(&self, _record: NewTransaction) -> Result<Transaction> {
        Err(LedgerError::StoreUnavailable("ledger offline".into()))
    }
    async fn commit_balance_and_transaction(
        &self,
        n: &AccountNumber,
        balance: Balance,
        record: NewTransaction,
    ) -> Result<Transaction> {
        self.0.commit_balance_and_transaction(n, balance, record).await
    }
    async fn transactions_for_account(&self, n: &AccountNumber) -> Result<Vec<Transaction>> {
        self.0.transactions_for_account(n).await
    }
}
