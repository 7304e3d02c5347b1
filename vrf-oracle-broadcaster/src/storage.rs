use crate::events::{JobId, JobIdentity};
use alloy_primitives::B256;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// A trait defining the persistent record of which job has already fully
/// processed which log.
///
/// Markers are keyed by `(block_hash, log_index, job)`; each job owns
/// disjoint keys, so implementations only need per-key "last write wins"
/// consistency. Writing the same marker twice must succeed.
#[async_trait]
pub trait ConsumedLogStore: Send + Sync {
    async fn has_consumed_log(&self, block_hash: B256, log_index: u64, job_id: &JobId) -> Result<bool>;

    async fn has_consumed_log_v2(&self, block_hash: B256, log_index: u64, job_id: i32) -> Result<bool>;

    async fn mark_log_consumed(
        &self,
        block_hash: B256,
        log_index: u64,
        job_id: &JobId,
        block_number: u64,
    ) -> Result<()>;

    async fn mark_log_consumed_v2(
        &self,
        block_hash: B256,
        log_index: u64,
        job_id: i32,
        block_number: u64,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConsumedLogKey {
    block_hash: B256,
    log_index: u64,
    job: JobIdentity,
}

/// An in-memory [`ConsumedLogStore`], suitable for tests and for nodes that
/// accept re-processing after a restart.
#[derive(Debug, Default)]
pub struct MemoryConsumedLogStore {
    markers: DashMap<ConsumedLogKey, u64>,
}

impl MemoryConsumedLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of markers written so far.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    fn has(&self, block_hash: B256, log_index: u64, job: JobIdentity) -> bool {
        self.markers.contains_key(&ConsumedLogKey {
            block_hash,
            log_index,
            job,
        })
    }

    fn mark(&self, block_hash: B256, log_index: u64, job: JobIdentity, block_number: u64) {
        self.markers.insert(
            ConsumedLogKey {
                block_hash,
                log_index,
                job,
            },
            block_number,
        );
    }
}

#[async_trait]
impl ConsumedLogStore for MemoryConsumedLogStore {
    async fn has_consumed_log(&self, block_hash: B256, log_index: u64, job_id: &JobId) -> Result<bool> {
        Ok(self.has(block_hash, log_index, JobIdentity::V1(*job_id)))
    }

    async fn has_consumed_log_v2(&self, block_hash: B256, log_index: u64, job_id: i32) -> Result<bool> {
        Ok(self.has(block_hash, log_index, JobIdentity::V2(job_id)))
    }

    async fn mark_log_consumed(
        &self,
        block_hash: B256,
        log_index: u64,
        job_id: &JobId,
        block_number: u64,
    ) -> Result<()> {
        self.mark(block_hash, log_index, JobIdentity::V1(*job_id), block_number);
        Ok(())
    }

    async fn mark_log_consumed_v2(
        &self,
        block_hash: B256,
        log_index: u64,
        job_id: i32,
        block_number: u64,
    ) -> Result<()> {
        self.mark(block_hash, log_index, JobIdentity::V2(job_id), block_number);
        Ok(())
    }
}
