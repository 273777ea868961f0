//! Per-file upload to a presigned target, and reconciliation of the local
//! originals mirror once the remote store has accepted a file.

mod mirror;
mod task;
mod uploader;
mod validation;

pub use mirror::OriginalsMirror;
pub use task::{TransferOutcome, TransferTask};
pub use uploader::{HttpUploader, UploadFuture, Uploader};
pub use validation::validate_relative_path;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("upload rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
