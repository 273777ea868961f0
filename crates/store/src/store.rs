use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use treesync_protocol::{JobRecord, LeaseStamp, Targets};

use crate::lock::RecordLock;
use crate::{JobId, StoreError};

/// Attempts at finding an unused id before giving up.
const CREATE_ATTEMPTS: usize = 8;

/// Directory of job records, one `<id>.json` per job.
#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Returns the queue directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    fn lock_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!(".{id}.lock"))
    }

    fn temp_path(&self, id: &JobId) -> PathBuf {
        self.dir
            .join(format!(".{id}.{:08x}.tmp", rand::random::<u32>()))
    }

    /// Creates a new unleased record and returns its id.
    pub async fn create(
        &self,
        repo_path: impl Into<PathBuf>,
        branch: impl Into<String>,
        targets: Targets,
        attempt_count: u32,
    ) -> Result<JobId, StoreError> {
        let mut record = JobRecord::new(repo_path, branch, targets);
        record.attempt_count = attempt_count;
        self.create_record(&record).await
    }

    /// Persists `record` under a freshly generated id.
    ///
    /// The record is written to a temp file and hard-linked into place, so
    /// the final name appears fully written and an existing id is never
    /// overwritten.
    pub async fn create_record(&self, record: &JobRecord) -> Result<JobId, StoreError> {
        let bytes = record.to_json()?;
        for _ in 0..CREATE_ATTEMPTS {
            let id = JobId::generate();
            let tmp = self.temp_path(&id);
            tokio::fs::write(&tmp, &bytes).await?;
            let linked = tokio::fs::hard_link(&tmp, self.record_path(&id)).await;
            if let Err(e) = tokio::fs::remove_file(&tmp).await {
                trace!(path = %tmp.display(), error = %e, "temp file already gone");
            }
            match linked {
                Ok(()) => {
                    debug!(job = %id, entries = record.len(), attempt = record.attempt_count, "job record created");
                    return Ok(id);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::IdExhausted)
    }

    /// Reads a whole record.
    pub async fn read(&self, id: &JobId) -> Result<JobRecord, StoreError> {
        let bytes = match tokio::fs::read(self.record_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        JobRecord::from_json(&bytes).map_err(|source| StoreError::Malformed {
            id: id.clone(),
            source,
        })
    }

    /// Replaces a whole record atomically (temp file + rename).
    ///
    /// Callers mutating a leased job should prefer
    /// [`compare_and_write`](Self::compare_and_write).
    pub async fn write(&self, id: &JobId, record: &JobRecord) -> Result<(), StoreError> {
        let bytes = record.to_json()?;
        let tmp = self.temp_path(id);
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.record_path(id)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        trace!(job = %id, entries = record.len(), "job record written");
        Ok(())
    }

    /// Deletes a record. Deleting an absent record succeeds.
    pub async fn delete(&self, id: &JobId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => {
                debug!(job = %id, "job record deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot of the job ids present right now, oldest first.
    ///
    /// Temp files, lock files and anything not named like a record are
    /// ignored.
    pub async fn list(&self) -> Result<Vec<JobId>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = JobId::from_file_name(name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Writes `record` only if the on-disk lease stamp still equals `expected`.
    ///
    /// Fails with [`StoreError::LeaseLost`] when another instance has
    /// touched the lease, and [`StoreError::Busy`] when another writer is
    /// mid-update.
    pub async fn compare_and_write(
        &self,
        id: &JobId,
        expected: &LeaseStamp,
        record: &JobRecord,
    ) -> Result<(), StoreError> {
        let _lock = RecordLock::acquire(self.lock_path(id), id).await?;
        self.verify_stamp(id, expected).await?;
        self.write(id, record).await
    }

    /// Deletes the record only if the on-disk lease stamp still equals `expected`.
    pub async fn compare_and_delete(
        &self,
        id: &JobId,
        expected: &LeaseStamp,
    ) -> Result<(), StoreError> {
        let _lock = RecordLock::acquire(self.lock_path(id), id).await?;
        self.verify_stamp(id, expected).await?;
        self.delete(id).await
    }

    async fn verify_stamp(&self, id: &JobId, expected: &LeaseStamp) -> Result<(), StoreError> {
        let current = self.read(id).await?;
        if current.lease_stamp() != *expected {
            return Err(StoreError::LeaseLost(id.clone()));
        }
        Ok(())
    }
}
