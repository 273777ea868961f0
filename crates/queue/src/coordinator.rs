//! Per-process coordination state.
//!
//! One [`Coordinator`] is built at startup and shared by every dispatch
//! cycle of the process. It carries the instance id written into leases
//! and the set of jobs this process is currently working on, so a cycle
//! started by the timer never re-enters a job an earlier, still-running
//! cycle owns.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use treesync_store::JobId;

/// Instance identity plus the in-flight job set.
#[derive(Debug)]
pub struct Coordinator {
    instance_id: String,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

impl Coordinator {
    pub fn with_instance_id(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Marks `id` as in flight. Returns `None` if it already is.
    ///
    /// The claim lasts until the returned guard is dropped.
    pub fn try_claim(&self, id: &JobId) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            id: id.clone(),
        })
    }

    /// Number of jobs currently claimed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Releases an in-flight claim on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<Mutex<HashSet<JobId>>>,
    id: JobId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}
