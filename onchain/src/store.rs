//! Persistent deposit and withdrawal store (RocksDB)
//!
//! Deposits are keyed by `chain|tx_hash` so a notification replay hits
//! the existing record. Withdrawals are keyed by ID.

use crate::types::{DepositRecord, Withdrawal, WithdrawalStatus};
use crate::{Error, Result};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const CF_DEPOSITS: &str = "deposits";
const CF_WITHDRAWALS: &str = "withdrawals";

fn deposit_store_key(chain: &str, tx_hash: &str) -> Vec<u8> {
    format!("{}|{}", chain, tx_hash).into_bytes()
}

/// RocksDB-backed onchain store
pub struct OnchainStore {
    db: Arc<DB>,
}

impl OnchainStore {
    /// Open or create the store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(&path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_DEPOSITS, Options::default()),
            ColumnFamilyDescriptor::new(CF_WITHDRAWALS, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Record a credited deposit
    pub fn put_deposit(&self, deposit: &DepositRecord) -> Result<()> {
        let cf = self.cf(CF_DEPOSITS)?;
        self.db.put_cf(
            cf,
            deposit_store_key(&deposit.chain, &deposit.tx_hash),
            bincode::serialize(deposit)?,
        )?;
        Ok(())
    }

    /// Deposit already credited for this (chain, tx_hash), if any
    pub fn get_deposit(&self, chain: &str, tx_hash: &str) -> Result<Option<DepositRecord>> {
        let cf = self.cf(CF_DEPOSITS)?;
        match self.db.get_cf(cf, deposit_store_key(chain, tx_hash))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All credited deposits
    pub fn list_deposits(&self) -> Result<Vec<DepositRecord>> {
        let cf = self.cf(CF_DEPOSITS)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);

        let mut deposits = Vec::new();
        for item in iter {
            let (_, value) = item?;
            deposits.push(bincode::deserialize(&value)?);
        }
        Ok(deposits)
    }

    /// Insert or update a withdrawal
    pub fn put_withdrawal(&self, withdrawal: &Withdrawal) -> Result<()> {
        let cf = self.cf(CF_WITHDRAWALS)?;
        self.db.put_cf(
            cf,
            withdrawal.id.as_bytes(),
            bincode::serialize(withdrawal)?,
        )?;
        Ok(())
    }

    /// Get withdrawal by ID
    pub fn get_withdrawal(&self, id: Uuid) -> Result<Withdrawal> {
        let cf = self.cf(CF_WITHDRAWALS)?;
        let value = self
            .db
            .get_cf(cf, id.as_bytes())?
            .ok_or(Error::WithdrawalNotFound(id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// All withdrawals
    pub fn list_withdrawals(&self) -> Result<Vec<Withdrawal>> {
        let cf = self.cf(CF_WITHDRAWALS)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);

        let mut withdrawals = Vec::new();
        for item in iter {
            let (_, value) = item?;
            withdrawals.push(bincode::deserialize(&value)?);
        }
        Ok(withdrawals)
    }

    /// Withdrawals awaiting payout confirmation
    pub fn list_processing(&self) -> Result<Vec<Withdrawal>> {
        Ok(self
            .list_withdrawals()?
            .into_iter()
            .filter(|w| w.status == WithdrawalStatus::Processing)
            .collect())
    }

    /// Withdrawals flagged for manual or reconciliation review
    pub fn list_stuck(&self) -> Result<Vec<Withdrawal>> {
        Ok(self
            .list_withdrawals()?
            .into_iter()
            .filter(|w| w.status == WithdrawalStatus::Stuck)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_deposit(chain: &str, tx_hash: &str) -> DepositRecord {
        DepositRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            chain: chain.to_string(),
            tx_hash: tx_hash.to_string(),
            amount: dec!(250),
            from_address: "0xsender".to_string(),
            ledger_transaction_id: Uuid::new_v4(),
            credited_at: Utc::now(),
        }
    }

    #[test]
    fn test_deposit_keyed_by_chain_and_hash() {
        let temp = tempfile::tempdir().unwrap();
        let store = OnchainStore::open(temp.path()).unwrap();

        let deposit = sample_deposit("ethereum", "0xh1");
        store.put_deposit(&deposit).unwrap();

        let found = store.get_deposit("ethereum", "0xh1").unwrap().unwrap();
        assert_eq!(found.id, deposit.id);

        // Same hash on another chain is a distinct deposit
        assert!(store.get_deposit("polygon", "0xh1").unwrap().is_none());
    }

    #[test]
    fn test_withdrawal_roundtrip_and_filters() {
        let temp = tempfile::tempdir().unwrap();
        let store = OnchainStore::open(temp.path()).unwrap();

        let mut withdrawal = Withdrawal::new(
            Uuid::new_v4(),
            "ethereum".to_string(),
            "0xdest".to_string(),
            dec!(100),
        );
        withdrawal.status = WithdrawalStatus::Processing;
        store.put_withdrawal(&withdrawal).unwrap();

        assert_eq!(store.list_processing().unwrap().len(), 1);
        assert!(store.list_stuck().unwrap().is_empty());

        withdrawal.status = WithdrawalStatus::Stuck;
        store.put_withdrawal(&withdrawal).unwrap();
        assert!(store.list_processing().unwrap().is_empty());
        assert_eq!(store.list_stuck().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_withdrawal() {
        let temp = tempfile::tempdir().unwrap();
        let store = OnchainStore::open(temp.path()).unwrap();
        assert!(matches!(
            store.get_withdrawal(Uuid::new_v4()),
            Err(Error::WithdrawalNotFound(_))
        ));
    }
}
