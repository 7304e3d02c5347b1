//! Provides a `sled`-based implementation of the
//! [`ConsumedLogStore`] trait defined in `vrf-oracle-broadcaster`.
//!
//! Every marker lives in one tree. Keys are fixed-layout byte strings, so all
//! markers of a block sort together:
//!
//! ```text
//! scheme tag (1) | block hash (32) | log index, big endian (8) | job key
//! ```
//!
//! where the job key is the 16 UUID bytes of a v1 job or the 4 big-endian
//! bytes of a v2 job id.
use alloy_primitives::B256;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use vrf_oracle_broadcaster::{events::JobIdentity, storage::ConsumedLogStore, JobId};

const CONSUMED_LOGS_TREE: &str = "consumed_logs";

const V1_TAG: u8 = 1;
const V2_TAG: u8 = 2;

/// The value stored under each key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedMarker {
    pub block_number: u64,
    pub consumed_at: DateTime<Utc>,
}

/// A `sled`-backed implementation of the [`ConsumedLogStore`] trait.
///
/// Markers are only ever written, never deleted. Marking a log twice
/// overwrites the marker with an equivalent one.
#[derive(Clone)]
pub struct SledConsumedLogStore {
    tree: Tree,
}

impl SledConsumedLogStore {
    /// Creates the store on top of an already opened database.
    ///
    /// # Arguments
    ///
    /// * `db` - A `sled::Db` instance. Markers are kept in their own tree, so
    ///   the database can be shared with other components.
    pub fn new(db: &Db) -> Result<Self> {
        let tree = db
            .open_tree(CONSUMED_LOGS_TREE)
            .context("Failed to open consumed-log tree")?;
        Ok(Self { tree })
    }

    /// Opens (or creates) a database at `path` and the store inside it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("Failed to open sled database at {}", path.display()))?;
        Self::new(&db)
    }

    /// Reads the marker written for `(block_hash, log_index, job)`, if any.
    pub fn marker(
        &self,
        block_hash: B256,
        log_index: u64,
        job: JobIdentity,
    ) -> Result<Option<ConsumedMarker>> {
        let Some(bytes) = self.tree.get(marker_key(block_hash, log_index, job))? else {
            return Ok(None);
        };
        let (marker, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .context("Corrupt consumed-log marker")?;
        Ok(Some(marker))
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flushes all pending writes to disk.
    pub async fn flush(&self) -> Result<()> {
        self.tree.flush_async().await?;
        Ok(())
    }

    fn has(&self, block_hash: B256, log_index: u64, job: JobIdentity) -> Result<bool> {
        Ok(self
            .tree
            .contains_key(marker_key(block_hash, log_index, job))?)
    }

    async fn mark(
        &self,
        block_hash: B256,
        log_index: u64,
        job: JobIdentity,
        block_number: u64,
    ) -> Result<()> {
        let marker = ConsumedMarker {
            block_number,
            consumed_at: Utc::now(),
        };
        let value = bincode::serde::encode_to_vec(&marker, bincode::config::standard())?;
        self.tree
            .insert(marker_key(block_hash, log_index, job), value)?;
        self.tree.flush_async().await?;

        tracing::trace!(%job, %block_hash, log_index, block_number, "Marked log consumed");
        Ok(())
    }
}

fn marker_key(block_hash: B256, log_index: u64, job: JobIdentity) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32 + 8 + 16);
    key.push(match job {
        JobIdentity::V1(_) => V1_TAG,
        JobIdentity::V2(_) => V2_TAG,
    });
    key.extend_from_slice(block_hash.as_slice());
    key.extend_from_slice(&log_index.to_be_bytes());
    match job {
        JobIdentity::V1(job_id) => key.extend_from_slice(job_id.as_bytes()),
        JobIdentity::V2(job_id) => key.extend_from_slice(&job_id.to_be_bytes()),
    }
    key
}

#[async_trait]
impl ConsumedLogStore for SledConsumedLogStore {
    async fn has_consumed_log(&self, block_hash: B256, log_index: u64, job_id: &JobId) -> Result<bool> {
        self.has(block_hash, log_index, JobIdentity::V1(*job_id))
    }

    async fn has_consumed_log_v2(&self, block_hash: B256, log_index: u64, job_id: i32) -> Result<bool> {
        self.has(block_hash, log_index, JobIdentity::V2(job_id))
    }

    async fn mark_log_consumed(
        &self,
        block_hash: B256,
        log_index: u64,
        job_id: &JobId,
        block_number: u64,
    ) -> Result<()> {
        self.mark(block_hash, log_index, JobIdentity::V1(*job_id), block_number)
            .await
    }

    async fn mark_log_consumed_v2(
        &self,
        block_hash: B256,
        log_index: u64,
        job_id: i32,
        block_number: u64,
    ) -> Result<()> {
        self.mark(block_hash, log_index, JobIdentity::V2(job_id), block_number)
            .await
    }
}
