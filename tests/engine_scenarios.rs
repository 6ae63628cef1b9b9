mod common;

use balance_ledger::application::audit::verify_account;
use balance_ledger::config::EngineConfig;
use balance_ledger::domain::account::{AccountNumber, Balance};
use balance_ledger::domain::ports::{AccountStore, Clock};
use balance_ledger::domain::transaction::{
    NewTransaction, TransactionId, TransactionResult, TransactionType,
};
use balance_ledger::error::LedgerError;
use chrono::{Duration, Months};
use common::{amount, funded_account, harness};

#[tokio::test]
async fn test_use_then_cancel_restores_balance() {
    let h = harness(EngineConfig::default());
    let (user, number) = funded_account(&h, 10_000).await;

    let used = h.engine.use_balance(user, &number, amount(1_000)).await.unwrap();
    assert_eq!(used.balance_snapshot.value(), 9_000);
    assert_eq!(used.transaction_id.as_str().len(), 32);

    let cancelled = h
        .engine
        .cancel_balance(&used.transaction_id, &number, amount(1_000))
        .await
        .unwrap();
    assert_eq!(cancelled.transaction_type, TransactionType::Cancel);
    assert_eq!(cancelled.balance_snapshot.value(), 10_000);

    let account = h.store.get_account(&number).await.unwrap().unwrap();
    assert_eq!(account.balance.value(), 10_000);

    let original = h.engine.query_transaction(&used.transaction_id).await.unwrap();
    assert_eq!(original.cancelled_by, Some(cancelled.transaction_id));
}

#[tokio::test]
async fn test_partial_cancel_is_rejected_and_recorded() {
    let h = harness(EngineConfig::default());
    let (user, number) = funded_account(&h, 10_000).await;
    let used = h.engine.use_balance(user, &number, amount(1_000)).await.unwrap();

    let err = h
        .engine
        .cancel_balance(&used.transaction_id, &number, amount(999))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::CancelMustBeFull { original: 1_000, requested: 999 }
    ));

    let ledger = h.engine.ledger(&number).await.unwrap();
    assert_eq!(ledger.len(), 2);
    let failed = &ledger[1];
    assert_eq!(failed.transaction_type, TransactionType::Cancel);
    assert_eq!(failed.result, TransactionResult::Failed);
    assert_eq!(failed.balance_snapshot.value(), 9_000);
}

#[tokio::test]
async fn test_insufficient_balance_records_failed_use() {
    let h = harness(EngineConfig::default());
    let (user, number) = funded_account(&h, 10_000).await;

    let err = h.engine.use_balance(user, &number, amount(10_001)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance { balance: 10_000, requested: 10_001 }
    ));

    let ledger = h.engine.ledger(&number).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].result, TransactionResult::Failed);
    assert_eq!(ledger[0].amount.value(), 10_001);
    assert_eq!(ledger[0].balance_snapshot.value(), 10_000);

    // Spending the whole balance is allowed.
    let tx = h.engine.use_balance(user, &number, amount(10_000)).await.unwrap();
    assert!(tx.balance_snapshot.is_zero());
}

#[tokio::test]
async fn test_use_by_other_user_is_rejected() {
    let h = harness(EngineConfig::default());
    let (_owner, number) = funded_account(&h, 10_000).await;
    let stranger = h.accounts.create_user("mallory").await.unwrap();

    let err = h
        .engine
        .use_balance(stranger.id, &number, amount(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::OwnerMismatch { .. }));
    let account = h.store.get_account(&number).await.unwrap().unwrap();
    assert_eq!(account.balance.value(), 10_000);
}

#[tokio::test]
async fn test_use_on_closed_account_is_rejected() {
    let h = harness(EngineConfig::default());
    let (user, number) = funded_account(&h, 0).await;
    h.accounts.close_account(user, &number).await.unwrap();

    let err = h.engine.use_balance(user, &number, amount(1)).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountClosed(_)));
}

#[tokio::test]
async fn test_cancel_against_other_account_is_rejected() {
    let h = harness(EngineConfig::default());
    let (user, first) = funded_account(&h, 10_000).await;
    let second = h
        .accounts
        .create_account(user, Balance::new(5_000).unwrap())
        .await
        .unwrap()
        .account_number;
    let used = h.engine.use_balance(user, &first, amount(1_000)).await.unwrap();

    let err = h
        .engine
        .cancel_balance(&used.transaction_id, &second, amount(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::TransactionAccountMismatch { .. }));

    let second_ledger = h.engine.ledger(&second).await.unwrap();
    assert_eq!(second_ledger.len(), 1);
    assert_eq!(second_ledger[0].result, TransactionResult::Failed);
    assert_eq!(second_ledger[0].balance_snapshot.value(), 5_000);
    let first_account = h.store.get_account(&first).await.unwrap().unwrap();
    assert_eq!(first_account.balance.value(), 9_000);
}

#[tokio::test]
async fn test_cancel_twice_is_rejected() {
    let h = harness(EngineConfig::default());
    let (user, number) = funded_account(&h, 10_000).await;
    let used = h.engine.use_balance(user, &number, amount(1_000)).await.unwrap();
    let cancel = h
        .engine
        .cancel_balance(&used.transaction_id, &number, amount(1_000))
        .await
        .unwrap();

    let err = h
        .engine
        .cancel_balance(&used.transaction_id, &number, amount(1_000))
        .await
        .unwrap_err();
    match err {
        LedgerError::TransactionAlreadyCancelled { cancelled_by, .. } => {
            assert_eq!(cancelled_by, cancel.transaction_id.to_string())
        }
        other => panic!("unexpected error: {other}"),
    }
    let account = h.store.get_account(&number).await.unwrap().unwrap();
    assert_eq!(account.balance.value(), 10_000);
}

#[tokio::test]
async fn test_cancel_unknown_transaction() {
    let h = harness(EngineConfig::default());
    let (_user, number) = funded_account(&h, 10_000).await;

    let err = h
        .engine
        .cancel_balance(&TransactionId::from("missing"), &number, amount(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::TransactionNotFound(_)));
    assert_eq!(h.engine.ledger(&number).await.unwrap().len(), 1);
}

async fn backdated_use(
    h: &common::Harness,
    number: &AccountNumber,
    age: Months,
    extra: Duration,
) -> TransactionId {
    let at = h.clock.now().checked_sub_months(age).unwrap() - extra;
    let tx = NewTransaction {
        account_number: number.clone(),
        transaction_type: TransactionType::Use,
        result: TransactionResult::Success,
        amount: amount(1_000),
        balance_snapshot: Balance::new(9_000).unwrap(),
        transacted_at: at,
        cancels: None,
    }
    .into_transaction(TransactionId::generate());
    let id = tx.transaction_id.clone();
    h.store.import_transaction(tx).await;
    id
}

#[tokio::test]
async fn test_cancel_window_boundary() {
    let h = harness(EngineConfig::default());
    let (_user, number) = funded_account(&h, 9_000).await;

    let just_inside = backdated_use(&h, &number, Months::new(12), Duration::zero()).await;
    let just_outside = backdated_use(&h, &number, Months::new(12), Duration::seconds(1)).await;

    let err = h
        .engine
        .cancel_balance(&just_outside, &number, amount(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::CancelWindowExpired(_)));

    let tx = h
        .engine
        .cancel_balance(&just_inside, &number, amount(1_000))
        .await
        .unwrap();
    assert_eq!(tx.balance_snapshot.value(), 10_000);
}

#[tokio::test]
async fn test_cancel_window_follows_clock() {
    let h = harness(EngineConfig::default().with_cancel_window_months(1));
    let (user, number) = funded_account(&h, 10_000).await;
    let used = h.engine.use_balance(user, &number, amount(1_000)).await.unwrap();

    h.clock.advance(Duration::days(40));
    let err = h
        .engine
        .cancel_balance(&used.transaction_id, &number, amount(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::CancelWindowExpired(_)));
}

#[tokio::test]
async fn test_ledger_replays_to_balance() {
    let h = harness(EngineConfig::default());
    let (user, number) = funded_account(&h, 10_000).await;

    let a = h.engine.use_balance(user, &number, amount(1_000)).await.unwrap();
    let _ = h.engine.use_balance(user, &number, amount(50_000)).await;
    h.engine.use_balance(user, &number, amount(2_500)).await.unwrap();
    h.engine
        .cancel_balance(&a.transaction_id, &number, amount(1_000))
        .await
        .unwrap();
    let _ = h
        .engine
        .cancel_balance(&a.transaction_id, &number, amount(1_000))
        .await;

    let report = verify_account(&h.store, &number).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.total_used, 3_500);
    assert_eq!(report.total_cancelled, 1_000);
    assert_eq!(report.failed_attempts, 2);
    assert_eq!(report.actual_balance.value(), 7_500);
}

#[tokio::test]
async fn test_cancel_on_closed_account_is_rejected_and_recorded() {
    let h = harness(EngineConfig::default());
    let (user, number) = funded_account(&h, 10_000).await;

    let first = h.engine.use_balance(user, &number, amount(1_000)).await.unwrap();
    h.engine
        .cancel_balance(&first.transaction_id, &number, amount(1_000))
        .await
        .unwrap();
    let emptied = h.engine.use_balance(user, &number, amount(10_000)).await.unwrap();
    h.accounts.close_account(user, &number).await.unwrap();

    let err = h
        .engine
        .cancel_balance(&emptied.transaction_id, &number, amount(10_000))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountClosed(_)));

    let ledger = h.engine.ledger(&number).await.unwrap();
    let last = ledger.last().unwrap();
    assert_eq!(last.transaction_type, TransactionType::Cancel);
    assert_eq!(last.result, TransactionResult::Failed);
    assert!(last.balance_snapshot.is_zero());

    let account = h.store.get_account(&number).await.unwrap().unwrap();
    assert!(account.balance.is_zero());
    assert!(verify_account(&h.store, &number).await.unwrap().is_consistent());
}
