use std::future::Future;
use std::pin::Pin;

use treesync_protocol::{JobRecord, LeaseStamp};

use crate::{JobId, JobStore, StoreError};

/// Boxed future returned by [`RecordStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Record operations a dispatcher needs from its queue.
///
/// [`JobStore`] is the only production implementation; tests wrap it to
/// inject failures.
pub trait RecordStore: Send + Sync {
    fn list(&self) -> StoreFuture<'_, Vec<JobId>>;

    fn read<'a>(&'a self, id: &'a JobId) -> StoreFuture<'a, JobRecord>;

    fn delete<'a>(&'a self, id: &'a JobId) -> StoreFuture<'a, ()>;

    fn create_record<'a>(&'a self, record: &'a JobRecord) -> StoreFuture<'a, JobId>;

    fn compare_and_write<'a>(
        &'a self,
        id: &'a JobId,
        expected: &'a LeaseStamp,
        record: &'a JobRecord,
    ) -> StoreFuture<'a, ()>;

    fn compare_and_delete<'a>(
        &'a self,
        id: &'a JobId,
        expected: &'a LeaseStamp,
    ) -> StoreFuture<'a, ()>;
}

impl RecordStore for JobStore {
    fn list(&self) -> StoreFuture<'_, Vec<JobId>> {
        Box::pin(JobStore::list(self))
    }

    fn read<'a>(&'a self, id: &'a JobId) -> StoreFuture<'a, JobRecord> {
        Box::pin(JobStore::read(self, id))
    }

    fn delete<'a>(&'a self, id: &'a JobId) -> StoreFuture<'a, ()> {
        Box::pin(JobStore::delete(self, id))
    }

    fn create_record<'a>(&'a self, record: &'a JobRecord) -> StoreFuture<'a, JobId> {
        Box::pin(JobStore::create_record(self, record))
    }

    fn compare_and_write<'a>(
        &'a self,
        id: &'a JobId,
        expected: &'a LeaseStamp,
        record: &'a JobRecord,
    ) -> StoreFuture<'a, ()> {
        Box::pin(JobStore::compare_and_write(self, id, expected, record))
    }

    fn compare_and_delete<'a>(
        &'a self,
        id: &'a JobId,
        expected: &'a LeaseStamp,
    ) -> StoreFuture<'a, ()> {
        Box::pin(JobStore::compare_and_delete(self, id, expected))
    }
}
