mod common;

use std::sync::Arc;

use anyhow::Result;
use common::*;
use kassa::application::LedgerService;
use kassa::domain::{EntryDetails, TransactionKind};
use kassa::{LedgerConfig, LedgerError, MemoryStore};

// ========================
// Wallet creation
// ========================

#[tokio::test]
async fn test_create_wallet_starts_empty() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;

    let wallet = service.create_wallet(1).await?;
    assert_eq!(wallet.user_id, 1);
    assert_eq!(wallet.balance, 0);
    assert_eq!(wallet.currency, "USD");

    let fetched = service.get_wallet(wallet.id).await?;
    assert_eq!(fetched.balance, 0);
    assert!(service.list_transactions(wallet.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_second_wallet_for_user_rejected() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;
    service.create_wallet(1).await?;

    let result = service.create_wallet(1).await;
    assert!(matches!(result, Err(LedgerError::AlreadyExists(_))));

    let result = service.open_wallet(1, 500, EntryDetails::default()).await;
    assert!(matches!(result, Err(LedgerError::AlreadyExists(_))));

    Ok(())
}

#[tokio::test]
async fn test_open_wallet_logs_opening_deposit() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;

    let wallet = service
        .open_wallet(7, 12_500, EntryDetails::default().with_note("opening"))
        .await?;
    assert_eq!(wallet.balance, 12_500);
    assert_eq!(service.get_balance(7).await?.balance, 12_500);

    let history = service.list_transactions(wallet.id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::Deposit);
    assert_eq!(history[0].amount, 12_500);
    assert_eq!(history[0].note.as_deref(), Some("opening"));

    Ok(())
}

#[tokio::test]
async fn test_open_wallet_with_zero_writes_no_entry() -> Result<()> {
    let service = memory_service();

    let wallet = service.open_wallet(7, 0, EntryDetails::default()).await?;
    assert_eq!(wallet.balance, 0);
    assert!(service.list_transactions(wallet.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_invalid_ids_rejected_before_storage() -> Result<()> {
    let service = memory_service();

    assert!(matches!(
        service.create_wallet(0).await,
        Err(LedgerError::InvalidOperation(_))
    ));
    assert!(matches!(
        service.deposit(-3, 100).await,
        Err(LedgerError::InvalidOperation(_))
    ));
    assert!(matches!(
        service.get_wallet(0).await,
        Err(LedgerError::InvalidOperation(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_lookups_of_missing_wallet() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;

    assert!(matches!(
        service.get_balance(42).await,
        Err(LedgerError::NotFound(_))
    ));
    assert!(matches!(
        service.get_wallet(42).await,
        Err(LedgerError::NotFound(_))
    ));
    // History of an unknown wallet is simply empty
    assert!(service.list_transactions(42).await?.is_empty());

    Ok(())
}

// ========================
// Deposits
// ========================

#[tokio::test]
async fn test_simple_deposit() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;
    let wallet = service.create_wallet(1).await?;

    let updated = service.deposit(1, 10_000).await?;
    assert_eq!(updated.id, wallet.id);
    assert_eq!(updated.balance, 10_000);

    let history = service.list_transactions(wallet.id).await?;
    assert_eq!(history.len(), 1);
    let entry = &history[0];
    assert_eq!(entry.kind, TransactionKind::Deposit);
    assert_eq!(entry.amount, 10_000);
    assert_eq!(entry.from_wallet, Some(wallet.id));
    assert_eq!(entry.to_wallet, None);

    Ok(())
}

#[tokio::test]
async fn test_deposit_provisions_missing_wallet() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;

    let wallet = service.deposit(9, 2_500).await?;
    assert_eq!(wallet.user_id, 9);
    assert_eq!(wallet.balance, 2_500);

    let history = service.list_transactions(wallet.id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, 2_500);

    Ok(())
}

#[tokio::test]
async fn test_deposit_without_auto_provision_fails() -> Result<()> {
    let (service, _temp) =
        sqlite_service_with(|config| config.auto_provision_on_deposit = false).await?;

    let result = service.deposit(9, 2_500).await;
    assert!(matches!(result, Err(LedgerError::NotFound(_))));
    assert!(matches!(
        service.get_balance(9).await,
        Err(LedgerError::NotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_non_positive_amounts_rejected() -> Result<()> {
    let service = memory_service();
    let wallet = funded_wallet(&service, 1, 1_000).await?;

    for amount in [0, -1, -1_000] {
        assert!(matches!(
            service.deposit(1, amount).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            service.withdraw(1, amount).await,
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    assert_eq!(service.get_balance(1).await?.balance, 1_000);
    assert_eq!(service.list_transactions(wallet.id).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_negative_fee_rejected() -> Result<()> {
    let service = memory_service();
    funded_wallet(&service, 1, 1_000).await?;

    let result = service
        .deposit_with(1, 100, EntryDetails::default().with_fee(-5))
        .await;
    assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));

    Ok(())
}

#[tokio::test]
async fn test_fee_is_recorded_but_not_charged() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;
    let wallet = funded_wallet(&service, 1, 1_000).await?;

    let updated = service
        .withdraw_with(1, 400, EntryDetails::default().with_fee(25))
        .await?;
    assert_eq!(updated.balance, 600);

    let history = service.list_transactions(wallet.id).await?;
    assert_eq!(history[0].kind, TransactionKind::Withdrawal);
    assert_eq!(history[0].fee, 25);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_all_land() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;
    let service = Arc::new(service);
    let wallet = service.create_wallet(1).await?;

    let mut handles = Vec::new();
    for i in 1..=20 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move { service.deposit(1, i * 100).await }));
    }
    for handle in handles {
        handle.await??;
    }

    let expected: i64 = (1..=20).map(|i| i * 100).sum();
    assert_eq!(service.get_balance(1).await?.balance, expected);
    assert_eq!(service.list_transactions(wallet.id).await?.len(), 20);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_deposits_provision_one_wallet() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move { service.deposit(5, 1_000).await }));
    }
    let mut wallet_ids = Vec::new();
    for handle in handles {
        wallet_ids.push(handle.await??.id);
    }

    wallet_ids.dedup();
    assert_eq!(wallet_ids.len(), 1);
    assert_eq!(service.get_balance(5).await?.balance, 8_000);
    assert_eq!(service.check_integrity().await?.wallet_count, 1);

    Ok(())
}

// ========================
// Withdrawals
// ========================

#[tokio::test]
async fn test_withdraw_reduces_balance() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;
    let wallet = funded_wallet(&service, 1, 10_000).await?;

    let updated = service.withdraw(1, 3_000).await?;
    assert_eq!(updated.balance, 7_000);

    let history = service.list_transactions(wallet.id).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, TransactionKind::Withdrawal);
    assert_eq!(history[0].amount, 3_000);

    Ok(())
}

#[tokio::test]
async fn test_withdraw_entire_balance() -> Result<()> {
    let service = memory_service();
    funded_wallet(&service, 1, 10_000).await?;

    let updated = service.withdraw(1, 10_000).await?;
    assert_eq!(updated.balance, 0);

    Ok(())
}

#[tokio::test]
async fn test_overdraft_rejected() -> Result<()> {
    let (service, _temp) = sqlite_service().await?;
    let wallet = funded_wallet(&service, 1, 5_000).await?;

    let result = service.withdraw(1, 7_500).await;
    match result {
        Err(LedgerError::InsufficientFunds {
            wallet_id,
            balance,
            required,
        }) => {
            assert_eq!(wallet_id, wallet.id);
            assert_eq!(balance, 5_000);
            assert_eq!(required, 7_500);
        }
        other => panic!("expected insufficient funds, got {other:?}"),
    }

    assert_eq!(service.get_balance(1).await?.balance, 5_000);
    assert_eq!(service.list_transactions(wallet.id).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_withdraw_from_missing_wallet() -> Result<()> {
    let service = memory_service();

    let result = service.withdraw(3, 100).await;
    assert!(matches!(result, Err(LedgerError::NotFound(_))));
    // Withdrawals never provision
    assert!(matches!(
        service.get_balance(3).await,
        Err(LedgerError::NotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_wallets_in_other_currency() -> Result<()> {
    let config = LedgerConfig {
        default_currency: "EUR".to_string(),
        ..LedgerConfig::default()
    };
    let service = LedgerService::with_store(Arc::new(MemoryStore::new()), config);

    let wallet = service.create_wallet(1).await?;
    assert_eq!(wallet.currency, "EUR");

    Ok(())
}
