//! Producer side of the queue.

use std::path::PathBuf;

use tracing::info;
use treesync_protocol::{JobRecord, Targets};
use treesync_store::{JobId, JobStore};

use crate::error::QueueError;

/// Persists a new job for `targets` and returns its id.
///
/// The staged copies must already be in the originals mirror; the job only
/// names them. Fails with [`QueueError::NoTargets`] for an empty map.
pub async fn enqueue(
    store: &JobStore,
    repo_path: impl Into<PathBuf>,
    branch: impl Into<String>,
    targets: Targets,
) -> Result<JobId, QueueError> {
    if targets.is_empty() {
        return Err(QueueError::NoTargets);
    }
    let record = JobRecord::new(repo_path, branch, targets);
    record.validate()?;

    let id = store.create_record(&record).await?;
    info!(
        job = %id,
        repo = %record.repo_path.display(),
        branch = %record.branch,
        entries = record.len(),
        "upload job enqueued"
    );
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use treesync_protocol::PresignedTarget;

    fn one_target() -> Targets {
        [(
            "index.html".to_string(),
            Some(PresignedTarget {
                url: "https://bucket.example/up".into(),
                fields: Default::default(),
            }),
        )]
        .into()
    }

    #[tokio::test]
    async fn enqueued_job_is_fresh() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();

        let id = enqueue(&store, "/work/site", "main", one_target()).await.unwrap();

        let record = store.read(&id).await.unwrap();
        assert_eq!(record.attempt_count, 0);
        assert!(record.lease_stamp().is_free());
        assert_eq!(record.targets(), &one_target());
    }

    #[tokio::test]
    async fn rejects_empty_and_invalid_jobs() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();

        assert!(matches!(
            enqueue(&store, "/work/site", "main", Targets::new()).await,
            Err(QueueError::NoTargets)
        ));
        assert!(matches!(
            enqueue(&store, "work/site", "main", one_target()).await,
            Err(QueueError::Record(_))
        ));
        assert!(matches!(
            enqueue(&store, "/work/site", " ", one_target()).await,
            Err(QueueError::Record(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }
}
