//! Durable upload queue.
//!
//! Takes job records produced by the editor integration and drives their
//! staged files to presigned targets, across restarts, concurrent agent
//! instances and network outages, using only the filesystem as shared
//! state.
//!
//! # Cycle
//!
//! 1. **List**: snapshot the job store
//! 2. **Gate**: one connectivity check for the whole cycle
//! 3. **Vet**: per job, check parse, lease, repository state, retry ceiling,
//!    prune entries whose staged copy is gone
//! 4. **Lease**: compare-and-swap the lease and bump the attempt count
//! 5. **Dispatch**: chunks in order, transfers within a chunk concurrently;
//!    failures move to a continuation job with a smaller chunk size

pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod lease;
pub mod maintenance;
pub mod policy;
pub mod producer;
pub mod repos;
pub mod types;

// Re-export primary types for convenience.
pub use coordinator::{Coordinator, InFlightGuard};
pub use dispatcher::{Dispatcher, QueueConfig};
pub use error::QueueError;
pub use lease::{LeaseStatus, now_millis};
pub use maintenance::{JobSummary, queue_status, requeue};
pub use policy::RetryPolicy;
pub use producer::enqueue;
pub use repos::{RepoRegistry, StaticRepoRegistry};
pub use types::{DispatchReport, DropReason, JobOutcome, SkipReason};
