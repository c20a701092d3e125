//! Persistent conversion job store (RocksDB)
//!
//! One column family keyed by job ID. The active set is small (at most
//! one job per buffer), so buffer lookups scan rather than index.

use crate::types::{BufferKind, ConversionJob};
use crate::{Error, Result};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const CF_JOBS: &str = "jobs";

/// RocksDB-backed job store
pub struct JobStore {
    db: Arc<DB>,
}

impl JobStore {
    /// Open or create the store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(&path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(CF_JOBS, Options::default())];
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_JOBS)
            .ok_or_else(|| Error::Storage("Column family jobs not found".to_string()))
    }

    /// Insert or update a job
    pub fn put_job(&self, job: &ConversionJob) -> Result<()> {
        let cf = self.cf()?;
        self.db
            .put_cf(cf, job.id.as_bytes(), bincode::serialize(job)?)?;
        Ok(())
    }

    /// Get job by ID
    pub fn get_job(&self, job_id: Uuid) -> Result<ConversionJob> {
        let cf = self.cf()?;
        let value = self
            .db
            .get_cf(cf, job_id.as_bytes())?
            .ok_or(Error::JobNotFound(job_id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// All jobs
    pub fn list_jobs(&self) -> Result<Vec<ConversionJob>> {
        let cf = self.cf()?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);

        let mut jobs = Vec::new();
        for item in iter {
            let (_, value) = item?;
            jobs.push(bincode::deserialize(&value)?);
        }
        Ok(jobs)
    }

    /// Jobs whose status still blocks their buffer
    pub fn active_jobs(&self) -> Result<Vec<ConversionJob>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|j| j.status.is_active())
            .collect())
    }

    /// Active job for a buffer, if one is in flight
    pub fn active_job_for_buffer(&self, buffer: BufferKind) -> Result<Option<ConversionJob>> {
        Ok(self
            .active_jobs()?
            .into_iter()
            .find(|j| j.buffer == buffer))
    }
}
