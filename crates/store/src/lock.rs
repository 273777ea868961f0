use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{JobId, StoreError};

/// Lock files older than this belong to a crashed writer.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// Exclusive, cross-process guard around one record's read-verify-write.
///
/// Held only for the duration of a single compare-and-swap; the lease is
/// what protects a job between writes.
pub(crate) struct RecordLock {
    path: PathBuf,
}

impl RecordLock {
    pub(crate) async fn acquire(path: PathBuf, id: &JobId) -> Result<Self, StoreError> {
        for _ in 0..2 {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !is_stale(&path).await {
                        return Err(StoreError::Busy(id.clone()));
                    }
                    break_stale(&path, id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Busy(id.clone()))
    }
}

/// Moves a stale lock out of the way without ever deleting a live one.
///
/// The lock is renamed to a name unique to this caller and only the moved
/// file is inspected. If it turns out to be fresh, another writer replaced
/// the stale lock in the meantime: it is linked back into place and the
/// record reported busy.
async fn break_stale(path: &Path, id: &JobId) -> Result<(), StoreError> {
    let mut tombstone = path.as_os_str().to_owned();
    tombstone.push(format!(".{:08x}.stale", rand::random::<u32>()));
    let tombstone = PathBuf::from(tombstone);

    match tokio::fs::rename(path, &tombstone).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let stale = is_stale(&tombstone).await;
    if !stale {
        match tokio::fs::hard_link(&tombstone, path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => tracing::warn!(job = %id, error = %e, "failed to restore record lock"),
        }
    } else {
        tracing::warn!(job = %id, "removing stale record lock");
    }
    if let Err(e) = tokio::fs::remove_file(&tombstone).await
        && e.kind() != ErrorKind::NotFound
    {
        tracing::warn!(path = %tombstone.display(), error = %e, "failed to remove lock tombstone");
    }

    if stale {
        Ok(())
    } else {
        Err(StoreError::Busy(id.clone()))
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release record lock");
        }
    }
}

async fn is_stale(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        // Vanished between create and stat: the next attempt will succeed.
        return true;
    };
    meta.modified()
        .ok()
        .and_then(|m| m.elapsed().ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}
