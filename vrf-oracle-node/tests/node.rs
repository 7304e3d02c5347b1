use alloy_primitives::{address, Address, B256};
use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;
use vrf_oracle_broadcaster::{
    listener::{ChannelListener, ListenerEvent},
    ChainClient, ClientError, ClientSubscription, FilterQuery, Header, JobIdentity, RawLog,
};
use vrf_oracle_node::{config::NodeConfig, OracleNode};
use vrf_oracle_store::SledConsumedLogStore;

const COORDINATOR: Address = address!("c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0");

/// A chain client that serves one live subscription at a time.
#[derive(Default)]
struct MockChainClient {
    live: Mutex<Option<mpsc::Sender<RawLog>>>,
    errors: Mutex<Option<mpsc::Sender<ClientError>>>,
}

impl MockChainClient {
    fn push_live(&self, log: RawLog) {
        let live = self.live.lock().unwrap().clone().expect("no live subscription");
        live.try_send(log).unwrap();
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn latest_header(&self) -> Result<Option<Header>, ClientError> {
        Ok(Some(Header {
            number: 500,
            hash: B256::repeat_byte(0x05),
        }))
    }

    async fn filter_logs(&self, _query: &FilterQuery) -> Result<Vec<RawLog>, ClientError> {
        Ok(Vec::new())
    }

    async fn subscribe_logs(&self, _query: &FilterQuery) -> Result<ClientSubscription, ClientError> {
        let (log_tx, log_rx) = mpsc::channel(16);
        let (err_tx, err_rx) = mpsc::channel(1);
        *self.live.lock().unwrap() = Some(log_tx);
        *self.errors.lock().unwrap() = Some(err_tx);
        Ok(ClientSubscription::new(log_rx, err_rx, || {}))
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ListenerEvent>) -> ListenerEvent {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for a listener event")
        .expect("listener channel closed")
}

#[tokio::test]
async fn test_node_delivers_logs_and_persists_markers() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("node-db");
    let mut config = NodeConfig::default();
    config.store.db_path = db_path.display().to_string();
    config.broadcaster.subscription.debounce_millis = 20;

    let client = Arc::new(MockChainClient::default());
    let node = OracleNode::start(config, client.clone()).await.unwrap();

    let (listener, mut rx) = ChannelListener::new(JobIdentity::V2(11));
    node.broadcaster().register(COORDINATOR, listener).await;
    assert!(matches!(next_event(&mut rx).await, ListenerEvent::Connected));

    let log = RawLog {
        address: COORDINATOR,
        topics: vec![B256::repeat_byte(0x01)],
        block_number: 501,
        block_hash: B256::repeat_byte(0x51),
        log_index: 6,
        ..Default::default()
    };
    client.push_live(log.clone());

    let ListenerEvent::Log(broadcast) = next_event(&mut rx).await else {
        panic!("expected a log");
    };
    assert_eq!(broadcast.raw_log(), &log);
    assert!(!broadcast.was_already_consumed().await.unwrap());
    broadcast.mark_consumed().await.unwrap();
    // The broadcast holds the store open.
    drop(broadcast);

    node.shutdown().await.unwrap();
    assert!(matches!(next_event(&mut rx).await, ListenerEvent::Disconnected));

    let store = SledConsumedLogStore::open(&db_path).unwrap();
    let marker = store
        .marker(log.block_hash, log.log_index, JobIdentity::V2(11))
        .unwrap()
        .expect("marker should be persisted");
    assert_eq!(marker.block_number, 501);
}

#[tokio::test]
async fn test_node_fails_to_start_on_unusable_db_path() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut config = NodeConfig::default();
    // A regular file cannot host a sled database directory.
    config.store.db_path = file.path().display().to_string();

    let result = OracleNode::start(config, Arc::new(MockChainClient::default())).await;
    assert!(result.is_err());
}
