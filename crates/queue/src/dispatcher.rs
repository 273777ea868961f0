//! Chunked dispatch of queued jobs.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, error, info, trace, warn};
use treesync_connectivity::ConnectivityGate;
use treesync_protocol::constants::{DEFAULT_CHUNK_SIZE, LEASE_TIMEOUT, MAX_RETRIES};
use treesync_protocol::{JobRecord, LeaseStamp, PresignedTarget, RecordError, Targets};
use treesync_store::{JobId, RecordStore, StoreError};
use treesync_transfer::{OriginalsMirror, TransferOutcome, Uploader, validate_relative_path};

use crate::coordinator::{Coordinator, InFlightGuard};
use crate::error::QueueError;
use crate::lease::{self, LeaseStatus, now_millis};
use crate::policy::RetryPolicy;
use crate::repos::RepoRegistry;
use crate::types::{DispatchReport, DropReason, JobOutcome, SkipReason};

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub chunk_size: usize,
    pub max_retries: u32,
    /// How long a lease stays valid after its last renewal.
    pub lease_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: MAX_RETRIES,
            lease_timeout: LEASE_TIMEOUT,
        }
    }
}

impl QueueConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_chunk_size: self.chunk_size,
            max_retries: self.max_retries,
        }
    }
}

/// Failed entries collected during one dispatch, persisted as a new job.
struct Continuation {
    id: JobId,
    record: JobRecord,
    _claim: Option<InFlightGuard>,
}

/// Drives queued jobs through leasing, chunked upload and reconciliation.
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    mirror: OriginalsMirror,
    uploader: Arc<dyn Uploader>,
    gate: Arc<ConnectivityGate>,
    repos: Arc<dyn RepoRegistry>,
    coordinator: Arc<Coordinator>,
    config: QueueConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        mirror: OriginalsMirror,
        uploader: Arc<dyn Uploader>,
        gate: Arc<ConnectivityGate>,
        repos: Arc<dyn RepoRegistry>,
        coordinator: Arc<Coordinator>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            mirror,
            uploader,
            gate,
            repos,
            coordinator,
            config,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Runs one pass over the queue.
    ///
    /// Jobs are taken one at a time in id order. An empty queue returns
    /// before the connectivity gate is consulted. Only a failure to list the
    /// store is an error; everything that goes wrong with a single job is
    /// reported as its [`JobOutcome`].
    pub async fn run_cycle(&self) -> Result<DispatchReport, QueueError> {
        let ids = self.store.list().await?;
        if ids.is_empty() {
            trace!("upload queue empty");
            return Ok(DispatchReport {
                queue_emptied: true,
                ..DispatchReport::default()
            });
        }

        info!(depth = ids.len(), "processing upload queue");
        let decision = self.gate.check().await;
        let online = decision.should_proceed();

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = match self.coordinator.try_claim(&id) {
                Some(_claim) => self.process(&id, online).await,
                None => JobOutcome::Skipped(SkipReason::InFlight),
            };
            log_outcome(&id, &outcome);
            outcomes.push((id, outcome));
        }

        let queue_emptied = self.store.list().await?.is_empty();
        if queue_emptied {
            info!("upload queue drained");
        }
        Ok(DispatchReport {
            gate: Some(decision),
            outcomes,
            queue_emptied,
        })
    }

    /// Vets one job and, if it qualifies, leases and dispatches it.
    async fn process(&self, id: &JobId, online: bool) -> JobOutcome {
        let mut record = match self.store.read(id).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return JobOutcome::Vanished,
            Err(StoreError::Malformed { source, .. }) => {
                if !online {
                    return JobOutcome::Skipped(SkipReason::NetworkDown);
                }
                warn!(job = %id, error = %source, "dropping unreadable job record");
                return match self.store.delete(id).await {
                    Ok(()) => JobOutcome::Dropped(DropReason::InvalidRecord),
                    Err(e) => aborted(e),
                };
            }
            Err(e) => return aborted(e),
        };

        let observed = record.lease_stamp();
        let instance_id = self.coordinator.instance_id();
        match lease::assess(&record, instance_id, now_millis(), self.config.lease_timeout) {
            LeaseStatus::HeldElsewhere { owner, remaining } => {
                debug!(
                    job = %id,
                    %owner,
                    remaining_secs = remaining.as_secs(),
                    "job leased by another instance"
                );
                return JobOutcome::Skipped(SkipReason::LeaseContention);
            }
            LeaseStatus::Expired { owner } => {
                info!(job = %id, %owner, "adopting job with expired lease");
            }
            LeaseStatus::Free | LeaseStatus::Owned => {}
        }

        if let Err(e) = record.validate() {
            if let RecordError::NewerSchema(version) = e {
                warn!(job = %id, version, "job written by a newer agent, leaving it alone");
                return JobOutcome::Skipped(SkipReason::NewerSchema);
            }
            if !online {
                return JobOutcome::Skipped(SkipReason::NetworkDown);
            }
            warn!(job = %id, error = %e, "dropping invalid job record");
            return self.drop_job(id, &observed, DropReason::InvalidRecord).await;
        }

        if !self.repos.is_connected(&record.repo_path) {
            if !online {
                return JobOutcome::Skipped(SkipReason::NetworkDown);
            }
            info!(
                job = %id,
                repo = %record.repo_path.display(),
                "repository disconnected, dropping job"
            );
            return self.drop_job(id, &observed, DropReason::RepoDisconnected).await;
        }

        let policy = self.config.policy();
        if policy.ceiling_reached(record.attempt_count) {
            trace!(job = %id, attempts = record.attempt_count, "job retained at retry ceiling");
            return JobOutcome::Skipped(SkipReason::RetryCeilingReached);
        }

        if record.is_legacy() {
            debug!(job = %id, version = record.version, "upgrading legacy job record");
        }

        let pruned = self.prune(&mut record).await;
        if pruned > 0 {
            debug!(job = %id, pruned, "pruned entries without a staged copy");
        }
        if record.is_empty() {
            return self.drop_job(id, &observed, DropReason::EmptyTargets).await;
        }

        let local_only = record.targets().values().all(Option::is_none);
        if !online && !local_only {
            return JobOutcome::Skipped(SkipReason::NetworkDown);
        }

        let chunk_size = policy.chunk_size_for(record.attempt_count);
        record.attempt_count += 1;
        record.set_lease(instance_id, now_millis());
        match self.store.compare_and_write(id, &observed, &record).await {
            Ok(()) => {}
            Err(StoreError::LeaseLost(_) | StoreError::Busy(_)) => {
                debug!(job = %id, "lost the race for the job lease");
                return JobOutcome::Skipped(SkipReason::LeaseContention);
            }
            Err(StoreError::NotFound(_)) => return JobOutcome::Vanished,
            Err(e) => return aborted(e),
        }

        self.dispatch(id, record, chunk_size).await
    }

    /// Deletes a job that will never be dispatched, provided nobody leased
    /// it since it was read.
    async fn drop_job(&self, id: &JobId, observed: &LeaseStamp, reason: DropReason) -> JobOutcome {
        match self.store.compare_and_delete(id, observed).await {
            Ok(()) => JobOutcome::Dropped(reason),
            Err(StoreError::LeaseLost(_) | StoreError::Busy(_)) => {
                JobOutcome::Skipped(SkipReason::LeaseContention)
            }
            Err(StoreError::NotFound(_)) => JobOutcome::Vanished,
            Err(e) => aborted(e),
        }
    }

    /// Removes entries whose path is unusable or whose staged copy is gone.
    async fn prune(&self, record: &mut JobRecord) -> usize {
        let mut gone = Vec::new();
        for rel in record.targets().keys() {
            let staged = validate_relative_path(rel).is_ok()
                && self
                    .mirror
                    .contains(&record.repo_path, &record.branch, rel)
                    .await;
            if !staged {
                trace!(file = %rel, "no staged copy");
                gone.push(rel.clone());
            }
        }
        for rel in &gone {
            record.file_path_and_urls.remove(rel);
        }
        gone.len()
    }

    /// Uploads a leased job chunk by chunk.
    ///
    /// After each chunk the failed entries are added to the continuation
    /// job first, then the resolved and failed entries leave the original,
    /// which is rewritten with a renewed lease or deleted once empty.
    async fn dispatch(&self, id: &JobId, mut record: JobRecord, chunk_size: usize) -> JobOutcome {
        let entries: Vec<(String, Option<PresignedTarget>)> = record
            .targets()
            .iter()
            .map(|(rel, target)| (rel.clone(), target.clone()))
            .collect();
        let chunks = entries.len().div_ceil(chunk_size);
        info!(
            job = %id,
            entries = entries.len(),
            chunk_size,
            chunks,
            attempt = record.attempt_count,
            "dispatching job"
        );

        let mut stamp = record.lease_stamp();
        let mut continuation: Option<Continuation> = None;
        let (mut uploaded, mut local_only, mut failed) = (0usize, 0usize, 0usize);

        for (index, chunk) in entries.chunks(chunk_size).enumerate() {
            let outcomes = self.run_chunk(&record, chunk).await;

            let mut chunk_failed = Targets::new();
            for ((rel, target), outcome) in chunk.iter().zip(outcomes) {
                match outcome {
                    TransferOutcome::Uploaded => uploaded += 1,
                    TransferOutcome::LocalOnly => local_only += 1,
                    TransferOutcome::Failed(_) => {
                        chunk_failed.insert(rel.clone(), target.clone());
                    }
                }
            }
            failed += chunk_failed.len();

            let carried = chunk_failed.is_empty()
                || match self.carry_over(id, &record, &mut continuation, &chunk_failed).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(job = %id, error = %e, "failed to persist continuation job");
                        false
                    }
                };

            for (rel, _) in chunk {
                if carried || !chunk_failed.contains_key(rel) {
                    record.file_path_and_urls.remove(rel);
                }
            }

            let persisted = if record.is_empty() {
                self.store.compare_and_delete(id, &stamp).await
            } else {
                record.set_lease(self.coordinator.instance_id(), now_millis());
                let result = self.store.compare_and_write(id, &stamp, &record).await;
                if result.is_ok() {
                    stamp = record.lease_stamp();
                }
                result
            };
            if let Err(e) = persisted {
                match &e {
                    StoreError::LeaseLost(_) | StoreError::Busy(_) | StoreError::NotFound(_) => {
                        warn!(job = %id, chunk = index + 1, error = %e, "lease lost mid-dispatch")
                    }
                    _ => error!(
                        job = %id,
                        chunk = index + 1,
                        error = %e,
                        "failed to persist job progress"
                    ),
                }
                self.release(continuation).await;
                return aborted(e);
            }

            info!(
                job = %id,
                chunk = index + 1,
                chunks,
                succeeded = chunk.len() - chunk_failed.len(),
                failed = chunk_failed.len(),
                "chunk done"
            );

            if !carried {
                self.release(continuation).await;
                return JobOutcome::Aborted {
                    reason: "continuation job could not be written".into(),
                };
            }
        }

        match self.release(continuation).await {
            None => JobOutcome::Completed {
                uploaded,
                local_only,
            },
            Some(continuation) => JobOutcome::Split {
                continuation,
                resolved: uploaded + local_only,
                failed,
            },
        }
    }

    /// Runs every task of a chunk concurrently and waits for all of them.
    async fn run_chunk(
        &self,
        record: &JobRecord,
        chunk: &[(String, Option<PresignedTarget>)],
    ) -> Vec<TransferOutcome> {
        let uploader = self.uploader.as_ref();
        join_all(chunk.iter().map(|(rel, target)| async move {
            match self
                .mirror
                .task(&record.repo_path, &record.branch, rel, target.clone())
            {
                Ok(task) => task.run(uploader).await,
                Err(e) => TransferOutcome::Failed(e),
            }
        }))
        .await
    }

    /// Adds `failed` to the continuation job, creating it on first use.
    ///
    /// The continuation inherits the bumped attempt count and is held under
    /// this instance's lease until the dispatch ends.
    async fn carry_over(
        &self,
        parent: &JobId,
        record: &JobRecord,
        slot: &mut Option<Continuation>,
        failed: &Targets,
    ) -> Result<(), StoreError> {
        let instance_id = self.coordinator.instance_id();
        match slot {
            Some(continuation) => {
                let expected = continuation.record.lease_stamp();
                let mut next = continuation.record.clone();
                next.file_path_and_urls
                    .extend(failed.iter().map(|(rel, target)| (rel.clone(), target.clone())));
                next.set_lease(instance_id, now_millis());
                self.store
                    .compare_and_write(&continuation.id, &expected, &next)
                    .await?;
                continuation.record = next;
            }
            None => {
                let mut next = JobRecord::new(
                    record.repo_path.clone(),
                    record.branch.clone(),
                    failed.clone(),
                );
                next.attempt_count = record.attempt_count;
                next.set_lease(instance_id, now_millis());
                let id = self.store.create_record(&next).await?;
                info!(job = %parent, continuation = %id, "requeued failed entries");
                *slot = Some(Continuation {
                    _claim: self.coordinator.try_claim(&id),
                    id,
                    record: next,
                });
            }
        }
        Ok(())
    }

    /// Clears this instance's lease on the continuation job, if any.
    ///
    /// A lease that cannot be cleared simply expires.
    async fn release(&self, slot: Option<Continuation>) -> Option<JobId> {
        let Continuation { id, record, _claim } = slot?;
        let expected = record.lease_stamp();
        let mut released = record;
        released.clear_lease();
        if let Err(e) = self.store.compare_and_write(&id, &expected, &released).await {
            warn!(job = %id, error = %e, "failed to release continuation lease");
        }
        Some(id)
    }
}

fn aborted(e: impl std::fmt::Display) -> JobOutcome {
    JobOutcome::Aborted {
        reason: e.to_string(),
    }
}

fn log_outcome(id: &JobId, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Completed { .. } | JobOutcome::Split { .. } => {
            info!(job = %id, %outcome, "job dispatched")
        }
        JobOutcome::Dropped(_) => info!(job = %id, %outcome, "job removed"),
        JobOutcome::Aborted { .. } => warn!(job = %id, %outcome, "job dispatch aborted"),
        JobOutcome::Skipped(_) | JobOutcome::Vanished => debug!(job = %id, %outcome, "job skipped"),
    }
}
