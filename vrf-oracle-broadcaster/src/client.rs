//! # Chain Client Abstraction
//!
//! The broadcaster only needs three things from a chain node: the current
//! head, a historical log query, and a live log subscription. [`ChainClient`]
//! captures exactly that surface so the engine can run against a websocket
//! client in production and against an in-memory double in tests.

use crate::{
    error::ClientError,
    events::{FilterQuery, Header, RawLog},
};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// A live log subscription as handed out by a [`ChainClient`].
///
/// The client pushes matching logs into `logs` and reports fatal
/// subscription failures on `errors`. Dropping either sender before
/// `unsubscribe` runs counts as a failure too, so the client must keep both
/// alive for as long as the subscription is healthy. `unsubscribe` tears the
/// remote subscription down; it is invoked at most once.
pub struct ClientSubscription {
    pub logs: mpsc::Receiver<RawLog>,
    pub errors: mpsc::Receiver<ClientError>,
    pub unsubscribe: Box<dyn FnOnce() + Send>,
}

impl ClientSubscription {
    pub fn new(
        logs: mpsc::Receiver<RawLog>,
        errors: mpsc::Receiver<ClientError>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            logs,
            errors,
            unsubscribe: Box::new(unsubscribe),
        }
    }
}

impl fmt::Debug for ClientSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSubscription").finish_non_exhaustive()
    }
}

/// A trait abstracting over the chain node connection.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetches the latest block header. `Ok(None)` means the node answered
    /// without a header, which callers treat as a transient failure.
    async fn latest_header(&self) -> Result<Option<Header>, ClientError>;

    /// Returns every log matching `query`, from `query.from_block` up to the head.
    async fn filter_logs(&self, query: &FilterQuery) -> Result<Vec<RawLog>, ClientError>;

    /// Opens a live subscription for logs emitted by `query.addresses`,
    /// starting at the current head.
    async fn subscribe_logs(&self, query: &FilterQuery) -> Result<ClientSubscription, ClientError>;
}
