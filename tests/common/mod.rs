#![allow(dead_code)]

use balance_ledger::application::accounts::AccountService;
use balance_ledger::application::engine::TransactionEngine;
use balance_ledger::application::lock::LockCoordinator;
use balance_ledger::config::EngineConfig;
use balance_ledger::domain::account::{AccountNumber, Amount, Balance};
use balance_ledger::infrastructure::clock::ManualClock;
use balance_ledger::infrastructure::in_memory::InMemoryStore;
use balance_ledger::infrastructure::lease_lock::LeaseLockProvider;
use chrono::{TimeZone, Utc};
use std::sync::Arc;

pub struct Harness {
    pub store: InMemoryStore,
    pub clock: ManualClock,
    pub engine: Arc<TransactionEngine>,
    pub accounts: AccountService,
}

pub fn harness(config: EngineConfig) -> Harness {
    let store = InMemoryStore::new();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap());
    let locks = LockCoordinator::new(Arc::new(LeaseLockProvider::new()), config.lock);
    let engine = TransactionEngine::new(
        Arc::new(store.clone()),
        locks.clone(),
        Arc::new(clock.clone()),
        &config,
    );
    let accounts = AccountService::new(Arc::new(store.clone()), locks, Arc::new(clock.clone()), &config);
    Harness {
        store,
        clock,
        engine: Arc::new(engine),
        accounts,
    }
}

/// Registers a user and opens one account for them.
pub async fn funded_account(h: &Harness, balance: i64) -> (u64, AccountNumber) {
    let user = h.accounts.create_user("alice").await.unwrap();
    let account = h
        .accounts
        .create_account(user.id, Balance::new(balance).unwrap())
        .await
        .unwrap();
    (user.id, account.account_number)
}

pub fn amount(value: i64) -> Amount {
    Amount::new(value).unwrap()
}
