//! Persistent exception and report store (RocksDB)

use crate::types::{CheckKind, ReconciliationException, ReconciliationReport};
use crate::{Error, Result};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const CF_EXCEPTIONS: &str = "exceptions";
const CF_REPORTS: &str = "reports";

/// RocksDB-backed reconciliation store
pub struct ExceptionStore {
    db: Arc<DB>,
}

impl ExceptionStore {
    /// Open or create the store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(&path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_EXCEPTIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_REPORTS, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Insert or update an exception
    pub fn put_exception(&self, exception: &ReconciliationException) -> Result<()> {
        let cf = self.cf(CF_EXCEPTIONS)?;
        self.db
            .put_cf(cf, exception.id.as_bytes(), bincode::serialize(exception)?)?;
        Ok(())
    }

    /// Get exception by ID
    pub fn get_exception(&self, id: Uuid) -> Result<ReconciliationException> {
        let cf = self.cf(CF_EXCEPTIONS)?;
        let value = self
            .db
            .get_cf(cf, id.as_bytes())?
            .ok_or(Error::ExceptionNotFound(id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// All exceptions
    pub fn list_exceptions(&self) -> Result<Vec<ReconciliationException>> {
        let cf = self.cf(CF_EXCEPTIONS)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);

        let mut exceptions = Vec::new();
        for item in iter {
            let (_, value) = item?;
            exceptions.push(bincode::deserialize(&value)?);
        }
        Ok(exceptions)
    }

    /// Exceptions still needing attention
    pub fn open_exceptions(&self) -> Result<Vec<ReconciliationException>> {
        Ok(self
            .list_exceptions()?
            .into_iter()
            .filter(|e| e.status.is_open())
            .collect())
    }

    /// Whether an open exception already references this record
    pub fn has_open_exception_for(&self, reference_id: Uuid) -> Result<bool> {
        Ok(self
            .open_exceptions()?
            .iter()
            .any(|e| e.reference_id == Some(reference_id)))
    }

    /// Whether a check already has an open exception, regardless of the
    /// record it references
    pub fn has_open_exception_for_check(&self, check: CheckKind) -> Result<bool> {
        Ok(self.open_exceptions()?.iter().any(|e| e.check == check))
    }

    /// Record a run report
    pub fn put_report(&self, report: &ReconciliationReport) -> Result<()> {
        let cf = self.cf(CF_REPORTS)?;
        self.db
            .put_cf(cf, report.id.as_bytes(), bincode::serialize(report)?)?;
        Ok(())
    }

    /// All run reports
    pub fn list_reports(&self) -> Result<Vec<ReconciliationReport>> {
        let cf = self.cf(CF_REPORTS)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);

        let mut reports = Vec::new();
        for item in iter {
            let (_, value) = item?;
            reports.push(bincode::deserialize(&value)?);
        }
        reports.sort_by_key(|r: &ReconciliationReport| r.started_at);
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CheckKind, ExceptionStatus};
    use rust_decimal_macros::dec;

    #[test]
    fn test_exception_roundtrip_and_open_filter() {
        let temp = tempfile::tempdir().unwrap();
        let store = ExceptionStore::open(temp.path()).unwrap();

        let mut exception = ReconciliationException::new(
            CheckKind::WalletBalance,
            dec!(500),
            "drift".to_string(),
        );
        store.put_exception(&exception).unwrap();

        assert_eq!(store.open_exceptions().unwrap().len(), 1);

        exception.status = ExceptionStatus::Resolved;
        store.put_exception(&exception).unwrap();
        assert!(store.open_exceptions().unwrap().is_empty());
        assert_eq!(store.list_exceptions().unwrap().len(), 1);
    }

    #[test]
    fn test_reference_deduplication() {
        let temp = tempfile::tempdir().unwrap();
        let store = ExceptionStore::open(temp.path()).unwrap();

        let reference_id = Uuid::new_v4();
        let mut exception = ReconciliationException::new(
            CheckKind::StuckWithdrawals,
            dec!(200),
            "stuck".to_string(),
        );
        exception.reference_id = Some(reference_id);
        store.put_exception(&exception).unwrap();

        assert!(store.has_open_exception_for(reference_id).unwrap());
        assert!(!store.has_open_exception_for(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn test_missing_exception() {
        let temp = tempfile::tempdir().unwrap();
        let store = ExceptionStore::open(temp.path()).unwrap();
        assert!(matches!(
            store.get_exception(Uuid::new_v4()),
            Err(Error::ExceptionNotFound(_))
        ));
    }
}
