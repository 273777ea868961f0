use std::time::Duration;

/// Schema version written into every job record.
///
/// Records without a `version` field predate versioning and are read as 1.
pub const SCHEMA_VERSION: u32 = 2;

/// Number of files dispatched concurrently for a fresh job.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Attempt count at which a job is retained but no longer dispatched.
pub const MAX_RETRIES: u32 = 10;

/// How long a lease protects a job from other instances.
pub const LEASE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long a failed reachability probe suppresses further probes.
pub const NETWORK_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Default period of the dispatch loop.
pub const DISPATCH_INTERVAL: Duration = Duration::from_secs(60);

/// Extension of job record files inside the queue directory.
pub const JOB_FILE_EXTENSION: &str = "json";
