use alloy_primitives::B256;
use std::sync::Arc;
use tempfile::TempDir;
use vrf_oracle_broadcaster::{
    storage::ConsumedLogStore, JobId, JobIdentity, LogBroadcast, RawLog,
};
use vrf_oracle_store::SledConsumedLogStore;

fn open_store() -> (TempDir, SledConsumedLogStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SledConsumedLogStore::open(dir.path().join("db")).unwrap();
    (dir, store)
}

#[tokio::test]
async fn test_marking_twice_is_harmless() {
    let (_dir, store) = open_store();
    let hash = B256::repeat_byte(0x11);
    let job = JobId::new_random();

    assert!(!store.has_consumed_log(hash, 3, &job).await.unwrap());
    store.mark_log_consumed(hash, 3, &job, 100).await.unwrap();
    store.mark_log_consumed(hash, 3, &job, 100).await.unwrap();

    assert!(store.has_consumed_log(hash, 3, &job).await.unwrap());
    assert_eq!(store.len(), 1);
    let marker = store.marker(hash, 3, JobIdentity::V1(job)).unwrap().unwrap();
    assert_eq!(marker.block_number, 100);
}

#[tokio::test]
async fn test_markers_are_scoped_to_job_and_log() {
    let (_dir, store) = open_store();
    let hash = B256::repeat_byte(0x22);
    let job = JobId::new_random();

    store.mark_log_consumed(hash, 0, &job, 7).await.unwrap();
    store.mark_log_consumed_v2(hash, 0, 42, 7).await.unwrap();

    assert!(!store.has_consumed_log(hash, 0, &JobId::new_random()).await.unwrap());
    assert!(!store.has_consumed_log(hash, 1, &job).await.unwrap());
    assert!(!store.has_consumed_log(B256::ZERO, 0, &job).await.unwrap());
    assert!(store.has_consumed_log_v2(hash, 0, 42).await.unwrap());
    assert!(!store.has_consumed_log_v2(hash, 0, 43).await.unwrap());
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_markers_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let hash = B256::repeat_byte(0x33);
    {
        let store = SledConsumedLogStore::open(&path).unwrap();
        store.mark_log_consumed_v2(hash, 9, 5, 1_234).await.unwrap();
        store.flush().await.unwrap();
    }

    let store = SledConsumedLogStore::open(&path).unwrap();
    assert!(store.has_consumed_log_v2(hash, 9, 5).await.unwrap());
    let marker = store.marker(hash, 9, JobIdentity::V2(5)).unwrap().unwrap();
    assert_eq!(marker.block_number, 1_234);
}

#[tokio::test]
async fn test_broadcast_dedup_through_sled() {
    let (_dir, store) = open_store();
    let store: Arc<dyn ConsumedLogStore> = Arc::new(store);
    let raw_log = RawLog {
        block_hash: B256::repeat_byte(0x44),
        block_number: 55,
        log_index: 2,
        ..Default::default()
    };
    let job = JobIdentity::V1(JobId::new_random());

    let first = LogBroadcast::new(raw_log.clone(), job, store.clone());
    assert!(!first.was_already_consumed().await.unwrap());
    first.mark_consumed().await.unwrap();

    let redelivered = LogBroadcast::new(raw_log, job, store);
    assert!(redelivered.was_already_consumed().await.unwrap());
    redelivered.mark_consumed().await.unwrap();
}
