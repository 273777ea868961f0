//! Operator-facing queue inspection and recovery.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use treesync_protocol::JobRecord;
use treesync_store::{JobId, JobStore, StoreError};

use crate::error::QueueError;
use crate::lease::{self, LeaseStatus, now_millis};

/// One line of `status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub id: JobId,
    /// `None` when the record could not be parsed.
    pub repo_path: Option<PathBuf>,
    pub branch: Option<String>,
    pub entries: usize,
    pub attempt_count: u32,
    pub locked_by: Option<String>,
    pub locked_at: Option<i64>,
}

impl JobSummary {
    pub fn is_readable(&self) -> bool {
        self.repo_path.is_some()
    }

    fn from_record(id: JobId, record: &JobRecord) -> Self {
        let stamp = record.lease_stamp();
        Self {
            id,
            repo_path: Some(record.repo_path.clone()),
            branch: Some(record.branch.clone()),
            entries: record.len(),
            attempt_count: record.attempt_count,
            locked_by: stamp.owner,
            locked_at: stamp.acquired_at,
        }
    }

    fn unreadable(id: JobId) -> Self {
        Self {
            id,
            repo_path: None,
            branch: None,
            entries: 0,
            attempt_count: 0,
            locked_by: None,
            locked_at: None,
        }
    }
}

/// Summarises every record currently in the store, oldest first.
pub async fn queue_status(store: &JobStore) -> Result<Vec<JobSummary>, QueueError> {
    let mut summaries = Vec::new();
    for id in store.list().await? {
        match store.read(&id).await {
            Ok(record) => summaries.push(JobSummary::from_record(id, &record)),
            Err(StoreError::Malformed { .. }) => summaries.push(JobSummary::unreadable(id)),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(summaries)
}

/// Moves the entries of `id` into a fresh job at attempt 0 and deletes `id`.
///
/// This is how a job retained at the retry ceiling gets another round of
/// attempts; the attempt count of an existing record never goes down.
/// Refused while another instance holds a live lease on the job.
pub async fn requeue(
    store: &JobStore,
    id: &JobId,
    instance_id: &str,
    lease_timeout: Duration,
) -> Result<JobId, QueueError> {
    let record = store.read(id).await?;
    if let LeaseStatus::HeldElsewhere { owner, .. } =
        lease::assess(&record, instance_id, now_millis(), lease_timeout)
    {
        return Err(QueueError::Leased(id.clone(), owner));
    }
    record.validate()?;

    let observed = record.lease_stamp();
    let fresh = JobRecord::new(
        record.repo_path.clone(),
        record.branch.clone(),
        record.file_path_and_urls.clone(),
    );
    let new_id = store.create_record(&fresh).await?;
    if let Err(e) = store.compare_and_delete(id, &observed).await {
        // Someone picked the old job up meanwhile; keep exactly one copy.
        store.delete(&new_id).await?;
        return Err(e.into());
    }

    info!(
        job = %id,
        requeued_as = %new_id,
        entries = fresh.len(),
        previous_attempts = record.attempt_count,
        "job requeued"
    );
    Ok(new_id)
}
