use crate::domain::account::{Account, AccountNumber, AccountUser, Balance};
use crate::domain::ports::{AccountStore, LedgerStore};
use crate::domain::transaction::{NewTransaction, Transaction, TransactionId};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for registered users.
pub const CF_USERS: &str = "users";
/// Column Family for account states.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for ledger records, keyed by transaction id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family indexing each account's records in append order.
pub const CF_ACCOUNT_LEDGER: &str = "account_ledger";
/// Column Family for counters.
pub const CF_META: &str = "meta";

const NEXT_USER_ID: &[u8] = b"next_user_id";
const NEXT_ACCOUNT_ID: &[u8] = b"next_account_id";

fn ledger_seq_key(account_number: &AccountNumber) -> Vec<u8> {
    format!("ledger_seq:{account_number}").into_bytes()
}

fn ledger_index_key(account_number: &AccountNumber, seq: u64) -> Vec<u8> {
    let mut key = account_number.as_str().as_bytes().to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// A persistent store implementation using RocksDB.
///
/// Users, accounts and ledger records live in separate Column Families. A
/// commit writes the account, the new record, its index entry and (for
/// cancels) the updated original in a single `WriteBatch`, so they persist
/// together or not at all.
///
/// Writers inside this process are serialized by an internal mutex, which
/// also guards the id and sequence counters. Clones share the underlying
/// `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writes: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_USERS, CF_ACCOUNTS, CF_TRANSACTIONS, CF_ACCOUNT_LEDGER, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::internal(format!("{name} column family not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, batch: &mut WriteBatch, cf: &str, key: &[u8], value: &T) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn scan_json<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn read_counter(&self, key: &[u8]) -> Result<u64> {
        match self.db.get_cf(self.cf(CF_META)?, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LedgerError::internal("corrupt counter"))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Adds `record` (and its index entry) to `batch`. Caller holds `writes`.
    fn stage_append(&self, batch: &mut WriteBatch, record: NewTransaction) -> Result<Transaction> {
        let tx = record.into_transaction(TransactionId::generate());
        let seq_key = ledger_seq_key(&tx.account_number);
        let seq = self.read_counter(&seq_key)? + 1;

        self.put_json(batch, CF_TRANSACTIONS, tx.transaction_id.as_str().as_bytes(), &tx)?;
        batch.put_cf(
            self.cf(CF_ACCOUNT_LEDGER)?,
            ledger_index_key(&tx.account_number, seq),
            tx.transaction_id.as_str().as_bytes(),
        );
        batch.put_cf(self.cf(CF_META)?, seq_key, seq.to_be_bytes());
        Ok(tx)
    }
}

#[async_trait]
impl AccountStore for RocksDBStore {
    async fn get_user(&self, user_id: u64) -> Result<Option<AccountUser>> {
        self.get_json(CF_USERS, &user_id.to_be_bytes())
    }

    async fn insert_user(&self, name: &str) -> Result<AccountUser> {
        let _guard = self.writes.lock().await;
        let user = AccountUser {
            id: self.read_counter(NEXT_USER_ID)? + 1,
            name: name.to_string(),
        };

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_USERS, &user.id.to_be_bytes(), &user)?;
        batch.put_cf(self.cf(CF_META)?, NEXT_USER_ID, user.id.to_be_bytes());
        self.db.write(batch)?;
        Ok(user)
    }

    async fn get_account(&self, account_number: &AccountNumber) -> Result<Option<Account>> {
        self.get_json(CF_ACCOUNTS, account_number.as_str().as_bytes())
    }

    async fn accounts_by_owner(&self, user_id: u64) -> Result<Vec<Account>> {
        Ok(self
            .scan_json::<Account>(CF_ACCOUNTS)?
            .into_iter()
            .filter(|a| a.owner_id == user_id)
            .collect())
    }

    async fn last_account_number(&self) -> Result<Option<AccountNumber>> {
        // Fixed-width numbers sort lexicographically.
        match self
            .db
            .iterator_cf(self.cf(CF_ACCOUNTS)?, IteratorMode::End)
            .next()
        {
            Some(item) => {
                let (key, _value) = item?;
                let raw = String::from_utf8(key.into_vec())
                    .map_err(|e| LedgerError::InternalError(Box::new(e)))?;
                Ok(Some(AccountNumber::parse(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_account(
        &self,
        owner_id: u64,
        account_number: AccountNumber,
        balance: Balance,
        registered_at: DateTime<Utc>,
    ) -> Result<Account> {
        let _guard = self.writes.lock().await;
        if self.get_account(&account_number).await?.is_some() {
            return Err(LedgerError::internal(format!(
                "account number {account_number} already issued"
            )));
        }
        let id = self.read_counter(NEXT_ACCOUNT_ID)? + 1;
        let account = Account::new(id, account_number, owner_id, balance, registered_at);

        let mut batch = WriteBatch::default();
        self.put_json(
            &mut batch,
            CF_ACCOUNTS,
            account.account_number.as_str().as_bytes(),
            &account,
        )?;
        batch.put_cf(self.cf(CF_META)?, NEXT_ACCOUNT_ID, id.to_be_bytes());
        self.db.write(batch)?;
        Ok(account)
    }

    async fn update_account(&self, account: Account) -> Result<()> {
        let _guard = self.writes.lock().await;
        if self.get_account(&account.account_number).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account.account_number.to_string()));
        }
        let mut batch = WriteBatch::default();
        self.put_json(
            &mut batch,
            CF_ACCOUNTS,
            account.account_number.as_str().as_bytes(),
            &account,
        )?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<Transaction>> {
        self.get_json(CF_TRANSACTIONS, transaction_id.as_str().as_bytes())
    }

    async fn append_transaction(&self, record: NewTransaction) -> Result<Transaction> {
        let _guard = self.writes.lock().await;
        if self.get_account(&record.account_number).await?.is_none() {
            return Err(LedgerError::AccountNotFound(record.account_number.to_string()));
        }
        let mut batch = WriteBatch::default();
        let tx = self.stage_append(&mut batch, record)?;
        self.db.write(batch)?;
        Ok(tx)
    }

    async fn commit_balance_and_transaction(
        &self,
        account_number: &AccountNumber,
        new_balance: Balance,
        record: NewTransaction,
    ) -> Result<Transaction> {
        let _guard = self.writes.lock().await;

        let mut account = self
            .get_account(account_number)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;
        let mut original = match &record.cancels {
            Some(id) => {
                let tx = self
                    .get_transaction(id)
                    .await?
                    .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
                if let Some(by) = &tx.cancelled_by {
                    return Err(LedgerError::TransactionAlreadyCancelled {
                        transaction_id: id.to_string(),
                        cancelled_by: by.to_string(),
                    });
                }
                Some(tx)
            }
            None => None,
        };

        let mut batch = WriteBatch::default();
        let tx = self.stage_append(&mut batch, record)?;
        if let Some(orig) = original.as_mut() {
            orig.cancelled_by = Some(tx.transaction_id.clone());
            self.put_json(
                &mut batch,
                CF_TRANSACTIONS,
                orig.transaction_id.as_str().as_bytes(),
                &*orig,
            )?;
        }
        account.balance = new_balance;
        self.put_json(
            &mut batch,
            CF_ACCOUNTS,
            account.account_number.as_str().as_bytes(),
            &account,
        )?;
        self.db.write(batch)?;
        Ok(tx)
    }

    async fn transactions_for_account(
        &self,
        account_number: &AccountNumber,
    ) -> Result<Vec<Transaction>> {
        let prefix = account_number.as_str().as_bytes();
        let index = self.cf(CF_ACCOUNT_LEDGER)?;
        let mut records = Vec::new();
        for item in self
            .db
            .iterator_cf(index, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let id = TransactionId::from(
                String::from_utf8(value.into_vec())
                    .map_err(|e| LedgerError::InternalError(Box::new(e)))?,
            );
            let tx = self
                .get_transaction(&id)
                .await?
                .ok_or_else(|| LedgerError::internal(format!("dangling ledger index for {id}")))?;
            records.push(tx);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Amount;
    use crate::domain::transaction::{TransactionResult, TransactionType};
    use tempfile::tempdir;

    fn record(number: &AccountNumber, kind: TransactionType, balance: i64) -> NewTransaction {
        NewTransaction {
            account_number: number.clone(),
            transaction_type: kind,
            result: TransactionResult::Success,
            amount: Amount::new(100).unwrap(),
            balance_snapshot: Balance::new(balance).unwrap(),
            transacted_at: Utc::now(),
            cancels: None,
        }
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for cf in [CF_USERS, CF_ACCOUNTS, CF_TRANSACTIONS, CF_ACCOUNT_LEDGER, CF_META] {
            assert!(store.db.cf_handle(cf).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_account_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let user = store.insert_user("alice").await.unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(store.get_user(1).await.unwrap(), Some(user));

        let first = store
            .insert_account(1, AccountNumber::first(), Balance::new(500).unwrap(), Utc::now())
            .await
            .unwrap();
        let second_number = AccountNumber::first().successor().unwrap();
        store
            .insert_account(1, second_number.clone(), Balance::ZERO, Utc::now())
            .await
            .unwrap();

        assert_eq!(store.get_account(&first.account_number).await.unwrap(), Some(first));
        assert_eq!(store.accounts_by_owner(1).await.unwrap().len(), 2);
        assert_eq!(store.last_account_number().await.unwrap(), Some(second_number));
    }

    #[tokio::test]
    async fn test_rocksdb_ledger_commit_and_order() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let number = AccountNumber::first();
        let other = number.successor().unwrap();
        store
            .insert_account(1, number.clone(), Balance::new(1_000).unwrap(), Utc::now())
            .await
            .unwrap();
        store
            .insert_account(1, other.clone(), Balance::new(1_000).unwrap(), Utc::now())
            .await
            .unwrap();

        let used = store
            .commit_balance_and_transaction(
                &number,
                Balance::new(900).unwrap(),
                record(&number, TransactionType::Use, 900),
            )
            .await
            .unwrap();
        store
            .commit_balance_and_transaction(
                &other,
                Balance::new(900).unwrap(),
                record(&other, TransactionType::Use, 900),
            )
            .await
            .unwrap();

        let mut cancel = record(&number, TransactionType::Cancel, 1_000);
        cancel.cancels = Some(used.transaction_id.clone());
        let cancelled = store
            .commit_balance_and_transaction(&number, Balance::new(1_000).unwrap(), cancel)
            .await
            .unwrap();

        let ledger = store.transactions_for_account(&number).await.unwrap();
        let ids: Vec<_> = ledger.iter().map(|t| t.transaction_id.clone()).collect();
        assert_eq!(ids, vec![used.transaction_id.clone(), cancelled.transaction_id.clone()]);
        assert_eq!(ledger[0].cancelled_by, Some(cancelled.transaction_id));

        let account = store.get_account(&number).await.unwrap().unwrap();
        assert_eq!(account.balance.value(), 1_000);
        assert_eq!(store.transactions_for_account(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_reopen_keeps_state() {
        let dir = tempdir().unwrap();
        let number = AccountNumber::first();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.insert_user("alice").await.unwrap();
            store
                .insert_account(1, number.clone(), Balance::new(1_000).unwrap(), Utc::now())
                .await
                .unwrap();
            store
                .append_transaction(record(&number, TransactionType::Use, 1_000))
                .await
                .unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.insert_user("bob").await.unwrap().id, 2);
        assert_eq!(store.transactions_for_account(&number).await.unwrap().len(), 1);
    }
}
