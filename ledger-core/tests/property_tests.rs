//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Money conservation: Σ(debits) == Σ(credits) per transaction
//! - Balance derivation: cached balance == Σ(signed entry amounts)
//! - Idempotency: one transaction per key, no matter how many retries
//! - Non-negative user accounts under arbitrary spend sequences

use ledger_core::{
    AccountOwner, AccountType, Config, Currency, EntryDirection, Error, Ledger, NewEntry,
    NewTransaction, TransactionType,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Strategy for generating valid amounts (positive decimals, cents precision)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..1_000_000_00u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

/// Create test ledger with temp directory
async fn create_test_ledger() -> (Ledger, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();

    (Ledger::open(config).await.unwrap(), temp_dir)
}

/// Credit a user's spendable balance from the onchain buffer
async fn deposit(ledger: &Ledger, user_id: Uuid, amount: Decimal, key: &str) {
    let buffer = ledger
        .get_or_create_account(AccountOwner::System, AccountType::OnchainBuffer, Currency::Usdc)
        .await
        .unwrap();
    let user = ledger
        .get_or_create_account(
            AccountOwner::User(user_id),
            AccountType::UsdcBalance,
            Currency::Usdc,
        )
        .await
        .unwrap();

    ledger
        .create_transaction(NewTransaction {
            transaction_type: TransactionType::Deposit,
            idempotency_key: key.to_string(),
            entries: vec![
                NewEntry::new(buffer.id, EntryDirection::Debit, amount, Currency::Usdc),
                NewEntry::new(user.id, EntryDirection::Credit, amount, Currency::Usdc),
            ],
            reference_id: None,
            reference_type: None,
            description: None,
        })
        .await
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: every committed transaction conserves money
    #[test]
    fn prop_money_conservation(amount in amount_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let user_id = Uuid::new_v4();

            deposit(&ledger, user_id, amount, "dep-1").await;

            let tx = ledger.get_transaction_by_key("dep-1").unwrap().unwrap();
            prop_assert!(ledger.verify_transaction(tx.id).is_ok());

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: cached balance always equals the sum of signed entries
    #[test]
    fn prop_balance_matches_entry_history(
        amounts in prop::collection::vec(amount_strategy(), 1..10)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let user_id = Uuid::new_v4();

            for (i, amount) in amounts.iter().enumerate() {
                deposit(&ledger, user_id, *amount, &format!("dep-{}", i)).await;
            }

            let account = ledger
                .get_or_create_account(
                    AccountOwner::User(user_id),
                    AccountType::UsdcBalance,
                    Currency::Usdc,
                )
                .await
                .unwrap();

            let expected: Decimal = amounts.iter().sum();
            prop_assert_eq!(account.balance, expected);
            prop_assert_eq!(ledger.recompute_balance(account.id).unwrap(), expected);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: replaying the same key N times commits exactly one transaction
    #[test]
    fn prop_idempotent_replays(amount in amount_strategy(), replays in 2usize..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let user_id = Uuid::new_v4();

            for _ in 0..replays {
                deposit(&ledger, user_id, amount, "replay-key").await;
            }

            let account = ledger
                .get_or_create_account(
                    AccountOwner::User(user_id),
                    AccountType::UsdcBalance,
                    Currency::Usdc,
                )
                .await
                .unwrap();
            prop_assert_eq!(account.balance, amount);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: user accounts never go negative, whatever the spend sequence
    #[test]
    fn prop_user_balance_never_negative(
        initial in amount_strategy(),
        spends in prop::collection::vec(amount_strategy(), 1..10)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let user_id = Uuid::new_v4();

            deposit(&ledger, user_id, initial, "seed").await;

            for (i, amount) in spends.iter().enumerate() {
                let result = ledger
                    .reserve_for_investment(user_id, *amount, format!("spend-{}", i))
                    .await;

                // A rejection must be insufficient funds, never a partial apply
                if let Err(e) = result {
                    let is_insufficient_funds = matches!(e, Error::InsufficientFunds { .. });
                    prop_assert!(is_insufficient_funds);
                }

                let balances = ledger.get_user_balances(user_id).await.unwrap();
                prop_assert!(balances.usdc_balance >= Decimal::ZERO);
                prop_assert_eq!(
                    balances.usdc_balance + balances.pending_investment,
                    initial
                );
            }

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_deposit_invest_settle_lifecycle() {
        let (ledger, _temp) = create_test_ledger().await;
        let user_id = Uuid::new_v4();

        // 1. Deposit lands in the user's spendable bucket
        deposit(&ledger, user_id, dec!(1000), "life-dep").await;

        // 2. Reserve for an investment order
        ledger
            .reserve_for_investment(user_id, dec!(400), "life-res")
            .await
            .unwrap();

        // 3. Settlement converts the pending USDC into USD exposure
        let owner = AccountOwner::User(user_id);
        let pending = ledger
            .get_or_create_account(owner, AccountType::PendingInvestment, Currency::Usdc)
            .await
            .unwrap();
        let exposure = ledger
            .get_or_create_account(owner, AccountType::FiatExposure, Currency::Usd)
            .await
            .unwrap();

        ledger
            .create_transaction(NewTransaction {
                transaction_type: TransactionType::Investment,
                idempotency_key: "life-settle".to_string(),
                entries: vec![
                    NewEntry::new(pending.id, EntryDirection::Debit, dec!(400), Currency::Usdc),
                    NewEntry::new(exposure.id, EntryDirection::Credit, dec!(400), Currency::Usd),
                ],
                reference_id: None,
                reference_type: Some("investment_settlement".to_string()),
                description: None,
            })
            .await
            .unwrap();

        let balances = ledger.get_user_balances(user_id).await.unwrap();
        assert_eq!(balances.usdc_balance, dec!(600));
        assert_eq!(balances.pending_investment, Decimal::ZERO);
        assert_eq!(balances.fiat_exposure, dec!(400));
        assert_eq!(balances.total_value(), dec!(1000));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mixed_currency_rejected_for_plain_transfer() {
        let (ledger, _temp) = create_test_ledger().await;

        let onchain = ledger
            .get_or_create_account(AccountOwner::System, AccountType::OnchainBuffer, Currency::Usdc)
            .await
            .unwrap();
        let fiat = ledger
            .get_or_create_account(AccountOwner::System, AccountType::FiatBuffer, Currency::Usd)
            .await
            .unwrap();

        let result = ledger
            .create_transaction(NewTransaction {
                transaction_type: TransactionType::InternalTransfer,
                idempotency_key: "mixed-1".to_string(),
                entries: vec![
                    NewEntry::new(onchain.id, EntryDirection::Debit, dec!(10), Currency::Usdc),
                    NewEntry::new(fiat.id, EntryDirection::Credit, dec!(10), Currency::Usd),
                ],
                reference_id: None,
                reference_type: None,
                description: None,
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidTransaction(_))));

        // The same movement is legal as a conversion
        ledger
            .create_transaction(NewTransaction {
                transaction_type: TransactionType::Conversion,
                idempotency_key: "mixed-2".to_string(),
                entries: vec![
                    NewEntry::new(onchain.id, EntryDirection::Debit, dec!(10), Currency::Usdc),
                    NewEntry::new(fiat.id, EntryDirection::Credit, dec!(10), Currency::Usd),
                ],
                reference_id: None,
                reference_type: None,
                description: None,
            })
            .await
            .unwrap();

        ledger.shutdown().await.unwrap();
    }
}
