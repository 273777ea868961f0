//! Shared types for the treesync upload queue.
//!
//! Defines the persisted job record (one JSON document per upload batch),
//! the presigned target it carries per file, and the constants every
//! queue component agrees on.

pub mod constants;
pub mod record;

// Re-export primary types for convenience.
pub use record::{JobRecord, LeaseStamp, PresignedTarget, RecordError, Targets, targets_from_json};
