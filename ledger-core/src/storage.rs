//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Ledger accounts (key: account_id)
//! - `entries` - Immutable ledger entries (key: entry_id)
//! - `transactions` - Ledger transactions (key: transaction_id)
//! - `idempotency` - idempotency_key -> transaction_id
//! - `account_index` - (owner, account_type, currency) -> account_id
//! - `entry_index` - account_id || entry_id -> empty (per-account entry scan)

use crate::{
    error::{Error, Result},
    types::{AccountOwner, AccountType, Currency, LedgerAccount, LedgerEntry, LedgerTransaction},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_ENTRIES: &str = "entries";
const CF_TRANSACTIONS: &str = "transactions";
const CF_IDEMPOTENCY: &str = "idempotency";
const CF_ACCOUNT_INDEX: &str = "account_index";
const CF_ENTRY_INDEX: &str = "entry_index";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    // Column family handles are stored in DB, accessed by name
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        // Column family descriptors
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_ACCOUNT_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_ENTRY_INDEX, Self::cf_options_index()),
        ];

        // Open database
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(data_dir = ?path, "Opened ledger RocksDB");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_append_only() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // State is frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Indices benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Account operations

    /// Put account (create or update)
    pub fn put_account(&self, account: &LedgerAccount) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_put_account(&mut batch, account)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Get account by ID
    pub fn get_account(&self, account_id: Uuid) -> Result<LedgerAccount> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let value = self
            .db
            .get_cf(cf, account_id.as_bytes())?
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;

        let account: LedgerAccount = bincode::deserialize(&value)?;
        Ok(account)
    }

    /// Look up account by its unique (owner, type, currency) tuple
    pub fn find_account(
        &self,
        owner: &AccountOwner,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<Option<LedgerAccount>> {
        let cf = self.cf_handle(CF_ACCOUNT_INDEX)?;
        let key = Self::account_index_key(owner, account_type, currency);

        match self.db.get_cf(cf, &key)? {
            Some(value) => {
                let id_bytes: [u8; 16] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt account index value".to_string()))?;
                let account = self.get_account(Uuid::from_bytes(id_bytes))?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    /// List all accounts
    pub fn list_accounts(&self) -> Result<Vec<LedgerAccount>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);

        let mut accounts = Vec::new();
        for item in iter {
            let (_, value) = item?;
            accounts.push(bincode::deserialize(&value)?);
        }
        Ok(accounts)
    }

    // Entry operations

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let value = self
            .db
            .get_cf(cf, entry_id.as_bytes())?
            .ok_or_else(|| Error::Storage(format!("Entry not found: {}", entry_id)))?;

        let entry: LedgerEntry = bincode::deserialize(&value)?;
        Ok(entry)
    }

    /// Get all entries touching an account (via index)
    pub fn get_account_entries(&self, account_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRY_INDEX)?;

        let prefix = account_id.as_bytes();
        let iter = self.db.prefix_iterator_cf(cf, prefix);

        let mut entries = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if key.len() >= 32 {
                let entry_id_bytes: [u8; 16] = key[16..32]
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt entry index key".to_string()))?;
                entries.push(self.get_entry(Uuid::from_bytes(entry_id_bytes))?);
            }
        }
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    // Transaction operations

    /// Get transaction by ID
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<LedgerTransaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = self
            .db
            .get_cf(cf, transaction_id.as_bytes())?
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))?;

        let tx: LedgerTransaction = bincode::deserialize(&value)?;
        Ok(tx)
    }

    /// Update an existing transaction record (status transition)
    pub fn put_transaction(&self, tx: &LedgerTransaction) -> Result<()> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = bincode::serialize(tx)?;
        self.db.put_cf(cf, tx.id.as_bytes(), &value)?;
        Ok(())
    }

    /// Look up transaction by idempotency key
    pub fn get_transaction_by_key(&self, key: &str) -> Result<Option<LedgerTransaction>> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;

        match self.db.get_cf(cf, key.as_bytes())? {
            Some(value) => {
                let id_bytes: [u8; 16] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt idempotency value".to_string()))?;
                let tx = self.get_transaction(Uuid::from_bytes(id_bytes))?;
                Ok(Some(tx))
            }
            None => Ok(None),
        }
    }

    // Batch operations (atomic)

    /// Commit a transaction with its entries and updated accounts in one write
    pub fn commit_transaction(
        &self,
        tx: &LedgerTransaction,
        entries: &[LedgerEntry],
        accounts: &[LedgerAccount],
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. Transaction record
        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        batch.put_cf(cf_txs, tx.id.as_bytes(), &bincode::serialize(tx)?);

        // 2. Idempotency mapping
        let cf_idem = self.cf_handle(CF_IDEMPOTENCY)?;
        batch.put_cf(cf_idem, tx.idempotency_key.as_bytes(), tx.id.as_bytes());

        // 3. Entries + per-account index
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_entry_index = self.cf_handle(CF_ENTRY_INDEX)?;
        for entry in entries {
            batch.put_cf(cf_entries, entry.id.as_bytes(), &bincode::serialize(entry)?);

            let idx = Self::entry_index_key(entry.account_id, entry.id);
            batch.put_cf(cf_entry_index, &idx, &[]);
        }

        // 4. Updated account balances
        for account in accounts {
            self.batch_put_account(&mut batch, account)?;
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            transaction_id = %tx.id,
            idempotency_key = %tx.idempotency_key,
            entry_count = entries.len(),
            "Transaction committed"
        );

        Ok(())
    }

    fn batch_put_account(&self, batch: &mut WriteBatch, account: &LedgerAccount) -> Result<()> {
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        batch.put_cf(
            cf_accounts,
            account.id.as_bytes(),
            &bincode::serialize(account)?,
        );

        let cf_index = self.cf_handle(CF_ACCOUNT_INDEX)?;
        let key = Self::account_index_key(&account.owner, account.account_type, account.currency);
        batch.put_cf(cf_index, &key, account.id.as_bytes());

        Ok(())
    }

    // Index key helpers

    fn account_index_key(
        owner: &AccountOwner,
        account_type: AccountType,
        currency: Currency,
    ) -> Vec<u8> {
        let mut key = match owner {
            AccountOwner::User(id) => id.as_bytes().to_vec(),
            AccountOwner::System => vec![0u8; 16],
        };
        key.push(account_type as u8);
        key.push(match currency {
            Currency::Usdc => 1,
            Currency::Usd => 2,
        });
        key
    }

    fn entry_index_key(account_id: Uuid, entry_id: Uuid) -> Vec<u8> {
        let mut key = account_id.as_bytes().to_vec();
        key.extend_from_slice(entry_id.as_bytes());
        key
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("Ledger RocksDB closed gracefully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        EntryDirection, TransactionStatus, TransactionType,
    };
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn test_account() -> LedgerAccount {
        LedgerAccount::new(
            AccountOwner::User(Uuid::new_v4()),
            AccountType::UsdcBalance,
            Currency::Usdc,
        )
    }

    fn test_entry(account_id: Uuid, tx_id: Uuid) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            transaction_id: tx_id,
            account_id,
            direction: EntryDirection::Credit,
            amount: Decimal::new(10000, 2), // 100.00
            currency: Currency::Usdc,
            created_at: Utc::now(),
        }
    }

    fn test_transaction(key: &str, entry_ids: Vec<Uuid>) -> LedgerTransaction {
        LedgerTransaction {
            id: Uuid::new_v4(),
            transaction_type: TransactionType::Deposit,
            status: TransactionStatus::Completed,
            idempotency_key: key.to_string(),
            reference_id: None,
            reference_type: None,
            description: None,
            entry_ids,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_ACCOUNTS).is_some());
        assert!(storage.db.cf_handle(CF_IDEMPOTENCY).is_some());
    }

    #[test]
    fn test_put_and_find_account() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let account = test_account();
        storage.put_account(&account).unwrap();

        let retrieved = storage.get_account(account.id).unwrap();
        assert_eq!(retrieved.id, account.id);

        let found = storage
            .find_account(&account.owner, account.account_type, account.currency)
            .unwrap();
        assert_eq!(found.unwrap().id, account.id);

        let missing = storage
            .find_account(&AccountOwner::System, AccountType::OnchainBuffer, Currency::Usdc)
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_commit_transaction_atomic() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let mut account = test_account();
        storage.put_account(&account).unwrap();

        let tx_id = Uuid::new_v4();
        let entry = test_entry(account.id, tx_id);
        let mut tx = test_transaction("dep-1", vec![entry.id]);
        tx.id = tx_id;

        account.balance = entry.amount;
        storage
            .commit_transaction(&tx, &[entry.clone()], &[account.clone()])
            .unwrap();

        let retrieved_tx = storage.get_transaction(tx_id).unwrap();
        assert_eq!(retrieved_tx.idempotency_key, "dep-1");

        let by_key = storage.get_transaction_by_key("dep-1").unwrap();
        assert_eq!(by_key.unwrap().id, tx_id);

        let retrieved_account = storage.get_account(account.id).unwrap();
        assert_eq!(retrieved_account.balance, entry.amount);

        let entries = storage.get_account_entries(account.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry.id);
    }

    #[test]
    fn test_unknown_idempotency_key() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.get_transaction_by_key("nope").unwrap().is_none());
    }
}
