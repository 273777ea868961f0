//! The originals mirror: staged copies of files waiting for upload.
//!
//! Layout: `<root>/<repo key>/<branch>/<relative path>`, where the repo key
//! is the first 16 hex chars of SHA-256 over the repository's absolute path.
//! This crate only reads and deletes inside the mirror; staging is done by
//! the producer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use treesync_protocol::PresignedTarget;

use crate::task::TransferTask;
use crate::{TransferError, validate_relative_path};

/// Handle on the originals mirror directory.
#[derive(Debug, Clone)]
pub struct OriginalsMirror {
    root: PathBuf,
}

impl OriginalsMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Stable directory name for a repository.
    pub fn repo_key(repo_path: &Path) -> String {
        let digest = Sha256::digest(repo_path.to_string_lossy().as_bytes());
        hex::encode(&digest[..8])
    }

    /// Directory holding the staged files of one repository branch.
    pub fn branch_dir(&self, repo_path: &Path, branch: &str) -> Result<PathBuf, TransferError> {
        validate_relative_path(branch)?;
        Ok(self.root.join(Self::repo_key(repo_path)).join(branch))
    }

    /// Staged copy of `rel_path`.
    pub fn source_path(
        &self,
        repo_path: &Path,
        branch: &str,
        rel_path: &str,
    ) -> Result<PathBuf, TransferError> {
        validate_relative_path(rel_path)?;
        Ok(self.branch_dir(repo_path, branch)?.join(rel_path))
    }

    /// Returns `true` if a staged regular file exists for `rel_path`.
    pub async fn contains(&self, repo_path: &Path, branch: &str, rel_path: &str) -> bool {
        let Ok(path) = self.source_path(repo_path, branch, rel_path) else {
            return false;
        };
        tokio::fs::metadata(&path)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    /// Builds the transfer task for one job entry.
    pub fn task(
        &self,
        repo_path: &Path,
        branch: &str,
        rel_path: &str,
        target: Option<PresignedTarget>,
    ) -> Result<TransferTask, TransferError> {
        Ok(TransferTask {
            rel_path: rel_path.to_string(),
            source: self.source_path(repo_path, branch, rel_path)?,
            branch_dir: self.branch_dir(repo_path, branch)?,
            target,
        })
    }
}

/// Deletes a staged file and any parent directories it leaves empty, up to
/// (not including) `stop_at`.
///
/// Returns `false` if the file was already gone, which makes repeated
/// reconciliation of the same path harmless.
pub(crate) async fn remove_staged(source: &Path, stop_at: &Path) -> Result<bool, TransferError> {
    match tokio::fs::remove_file(source).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    let mut dir = source.parent();
    while let Some(current) = dir {
        if current == stop_at || !current.starts_with(stop_at) {
            break;
        }
        // Fails on non-empty directories, which ends the walk.
        if tokio::fs::remove_dir(current).await.is_err() {
            break;
        }
        dir = current.parent();
    }
    Ok(true)
}
