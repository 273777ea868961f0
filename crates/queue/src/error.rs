//! Queue error types.

use treesync_protocol::RecordError;
use treesync_store::{JobId, StoreError};

/// Errors surfaced by queue operations.
///
/// Per-job problems are reported as [`JobOutcome`](crate::JobOutcome)s, not
/// errors; only failures that stop a whole operation end up here.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid job: {0}")]
    Record(#[from] RecordError),

    #[error("job {0} is leased by {1}")]
    Leased(JobId, String),

    #[error("no upload targets given")]
    NoTargets,
}
