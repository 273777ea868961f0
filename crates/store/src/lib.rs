//! Filesystem-backed job record store.
//!
//! One JSON file per job inside a dedicated queue directory. Whole-record
//! reads and writes only; writes go through a temp file and a rename so a
//! reader never observes a half-written record. Mutations made while
//! holding a lease use [`JobStore::compare_and_write`] /
//! [`JobStore::compare_and_delete`], which re-check the lease stamp under a
//! short per-job lock file before touching the record.

mod id;
mod lock;
mod records;
mod store;

pub use id::JobId;
pub use records::{RecordStore, StoreFuture};
pub use store::JobStore;

/// Errors produced by the job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("malformed job record {id}: {source}")]
    Malformed {
        id: JobId,
        #[source]
        source: serde_json::Error,
    },

    #[error("lease on {0} changed since it was read")]
    LeaseLost(JobId),

    #[error("job {0} is locked by another writer")]
    Busy(JobId),

    #[error("invalid job id: {0}")]
    InvalidId(String),

    #[error("could not allocate a unique job id")]
    IdExhausted,
}
