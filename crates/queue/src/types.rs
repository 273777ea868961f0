//! Per-job outcomes and the per-cycle report handed to the host.

use std::fmt;

use treesync_connectivity::GateDecision;
use treesync_store::JobId;

/// Why a record was deleted without being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Unparseable, or missing required fields.
    InvalidRecord,
    /// No entry left once entries without a staged source were pruned.
    EmptyTargets,
    /// The owning repository is no longer connected.
    RepoDisconnected,
}

/// Why a record was left untouched this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// An earlier cycle of this process is still working on it.
    InFlight,
    /// Another instance holds a live lease.
    LeaseContention,
    /// The attempt count reached the retry ceiling; the record is retained.
    RetryCeilingReached,
    /// The connectivity gate said not to proceed.
    NetworkDown,
    /// Written by a newer schema than this build reads.
    NewerSchema,
}

/// What happened to one job during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every entry resolved; the record is gone.
    Completed { uploaded: usize, local_only: usize },
    /// Some entries failed and now live in `continuation`; the original
    /// record is gone.
    Split {
        continuation: JobId,
        resolved: usize,
        failed: usize,
    },
    Dropped(DropReason),
    Skipped(SkipReason),
    /// Dispatch stopped early (lost lease or store failure). Remaining
    /// entries are still on disk.
    Aborted { reason: String },
    /// The record disappeared between listing and reading.
    Vanished,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed {
                uploaded,
                local_only,
            } => write!(f, "completed ({uploaded} uploaded, {local_only} local)"),
            JobOutcome::Split {
                continuation,
                resolved,
                failed,
            } => write!(
                f,
                "split ({resolved} resolved, {failed} requeued as {continuation})"
            ),
            JobOutcome::Dropped(reason) => write!(f, "dropped ({reason:?})"),
            JobOutcome::Skipped(reason) => write!(f, "skipped ({reason:?})"),
            JobOutcome::Aborted { reason } => write!(f, "aborted ({reason})"),
            JobOutcome::Vanished => f.write_str("vanished"),
        }
    }
}

/// Aggregate result of one dispatch cycle.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Gate decision, or `None` if the queue was empty and no probe ran.
    pub gate: Option<GateDecision>,
    pub outcomes: Vec<(JobId, JobOutcome)>,
    /// `true` if the store held no records when the cycle ended.
    pub queue_emptied: bool,
}

impl DispatchReport {
    /// Outcome recorded for `id`, if the job was part of the cycle.
    pub fn outcome(&self, id: &JobId) -> Option<&JobOutcome> {
        self.outcomes
            .iter()
            .find_map(|(job, outcome)| (job == id).then_some(outcome))
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Completed { .. }))
    }

    pub fn split(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Split { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Skipped(_)))
    }

    pub fn dropped(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Dropped(_)))
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}
