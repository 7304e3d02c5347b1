//! # Log Broadcasts
//!
//! A [`LogBroadcast`] is what a listener receives for every matching log. It
//! is built fresh for each `(log, listener)` pair, so a listener can attach
//! its decoded payload without other listeners ever seeing it.
//!
//! Because logs may be delivered more than once (see the resubscribe loop in
//! [`crate::workers`]), the broadcast also carries the helpers a listener
//! uses to make re-processing a no-op: [`LogBroadcast::was_already_consumed`]
//! and [`LogBroadcast::mark_consumed`].

use crate::{
    error::DecodeError,
    events::{JobIdentity, RawLog},
    storage::ConsumedLogStore,
};
use anyhow::Result;
use std::{
    any::Any,
    fmt,
    sync::{Arc, OnceLock},
};

/// A type-erased decoded log, as attached by a decoding listener.
pub type DecodedLog = Arc<dyn Any + Send + Sync>;

pub struct LogBroadcast {
    raw_log: RawLog,
    decoded_log: OnceLock<DecodedLog>,
    job: JobIdentity,
    store: Arc<dyn ConsumedLogStore>,
}

impl LogBroadcast {
    pub fn new(raw_log: RawLog, job: JobIdentity, store: Arc<dyn ConsumedLogStore>) -> Self {
        Self {
            raw_log,
            decoded_log: OnceLock::new(),
            job,
            store,
        }
    }

    pub fn raw_log(&self) -> &RawLog {
        &self.raw_log
    }

    pub fn job_identity(&self) -> JobIdentity {
        self.job
    }

    /// Returns the decoded log if one was attached and it is a `T`.
    pub fn decoded_log<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.decoded_log.get().and_then(|log| log.downcast_ref::<T>())
    }

    /// Returns the decoded log without downcasting it.
    pub fn decoded_log_any(&self) -> Option<&DecodedLog> {
        self.decoded_log.get()
    }

    /// Attaches a decoded log. Each broadcast accepts exactly one.
    pub fn set_decoded_log<T: Any + Send + Sync>(&self, log: T) -> Result<(), DecodeError> {
        self.set_decoded_log_arc(Arc::new(log))
    }

    pub(crate) fn set_decoded_log_arc(&self, log: DecodedLog) -> Result<(), DecodeError> {
        self.decoded_log
            .set(log)
            .map_err(|_| DecodeError::AlreadyDecoded)
    }

    /// Reports whether this listener's job already recorded this log as consumed.
    pub async fn was_already_consumed(&self) -> Result<bool> {
        let log = &self.raw_log;
        match &self.job {
            JobIdentity::V1(job_id) => {
                self.store
                    .has_consumed_log(log.block_hash, log.log_index, job_id)
                    .await
            }
            JobIdentity::V2(job_id) => {
                self.store
                    .has_consumed_log_v2(log.block_hash, log.log_index, *job_id)
                    .await
            }
        }
    }

    /// Records this log as consumed by this listener's job. Safe to call repeatedly.
    pub async fn mark_consumed(&self) -> Result<()> {
        let log = &self.raw_log;
        match &self.job {
            JobIdentity::V1(job_id) => {
                self.store
                    .mark_log_consumed(log.block_hash, log.log_index, job_id, log.block_number)
                    .await
            }
            JobIdentity::V2(job_id) => {
                self.store
                    .mark_log_consumed_v2(log.block_hash, log.log_index, *job_id, log.block_number)
                    .await
            }
        }
    }
}

impl fmt::Debug for LogBroadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBroadcast")
            .field("raw_log", &self.raw_log)
            .field("decoded", &self.decoded_log.get().is_some())
            .field("job", &self.job)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{events::JobId, storage::MemoryConsumedLogStore};
    use alloy_primitives::B256;

    fn broadcast_for(job: JobIdentity, store: Arc<MemoryConsumedLogStore>) -> LogBroadcast {
        let raw_log = RawLog {
            block_hash: B256::repeat_byte(0xab),
            block_number: 42,
            log_index: 5,
            ..Default::default()
        };
        LogBroadcast::new(raw_log, job, store)
    }

    #[tokio::test]
    async fn mark_consumed_is_idempotent() {
        let store = Arc::new(MemoryConsumedLogStore::new());
        let broadcast = broadcast_for(JobIdentity::V1(JobId::new_random()), store.clone());

        assert!(!broadcast.was_already_consumed().await.unwrap());
        broadcast.mark_consumed().await.unwrap();
        broadcast.mark_consumed().await.unwrap();
        assert!(broadcast.was_already_consumed().await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn markers_are_scoped_to_the_job() {
        let store = Arc::new(MemoryConsumedLogStore::new());
        let first = broadcast_for(JobIdentity::V2(1), store.clone());
        let second = broadcast_for(JobIdentity::V2(2), store.clone());

        first.mark_consumed().await.unwrap();

        assert!(first.was_already_consumed().await.unwrap());
        assert!(!second.was_already_consumed().await.unwrap());
    }

    #[test]
    fn decoded_log_is_set_once() {
        let store = Arc::new(MemoryConsumedLogStore::new());
        let broadcast = broadcast_for(JobIdentity::V2(1), store);

        assert!(broadcast.decoded_log::<u64>().is_none());
        broadcast.set_decoded_log(7u64).unwrap();
        assert_eq!(
            broadcast.set_decoded_log(8u64),
            Err(DecodeError::AlreadyDecoded)
        );
        assert_eq!(broadcast.decoded_log::<u64>(), Some(&7));
        assert!(broadcast.decoded_log::<String>().is_none());
    }
}
