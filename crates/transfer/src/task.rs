use std::path::PathBuf;

use tracing::{debug, trace, warn};
use treesync_protocol::PresignedTarget;

use crate::TransferError;
use crate::mirror::remove_staged;
use crate::uploader::Uploader;

/// Upload of one job entry, followed by removal of its staged copy.
///
/// Built by [`OriginalsMirror::task`](crate::OriginalsMirror::task).
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub rel_path: String,
    pub source: PathBuf,
    pub(crate) branch_dir: PathBuf,
    pub target: Option<PresignedTarget>,
}

/// Terminal state of a transfer task.
#[derive(Debug)]
pub enum TransferOutcome {
    /// The remote store accepted the file; the staged copy was reconciled.
    Uploaded,
    /// There was no usable target; the staged copy was reconciled without
    /// any network call.
    LocalOnly,
    /// Upload failed; the staged copy is untouched.
    Failed(TransferError),
}

impl TransferTask {
    /// Runs the task to a terminal state. Never panics, never retries.
    ///
    /// The staged copy is removed on success or on a missing target, and
    /// never on failure.
    pub async fn run(&self, uploader: &dyn Uploader) -> TransferOutcome {
        let Some(target) = &self.target else {
            debug!(file = %self.rel_path, "no upload target, reconciling locally");
            self.reconcile().await;
            return TransferOutcome::LocalOnly;
        };

        match uploader.upload(&self.source, target).await {
            Ok(()) => {
                self.reconcile().await;
                TransferOutcome::Uploaded
            }
            Err(e) => {
                warn!(file = %self.rel_path, error = %e, "upload failed");
                TransferOutcome::Failed(e)
            }
        }
    }

    async fn reconcile(&self) {
        match remove_staged(&self.source, &self.branch_dir).await {
            Ok(true) => trace!(file = %self.rel_path, "staged copy removed"),
            Ok(false) => trace!(file = %self.rel_path, "staged copy already gone"),
            // The remote side has the file; a leftover local copy is only clutter.
            Err(e) => warn!(file = %self.rel_path, error = %e, "failed to remove staged copy"),
        }
    }
}
