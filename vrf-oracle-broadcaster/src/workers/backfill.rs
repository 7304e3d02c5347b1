use super::shutdown::ShutdownSignal;
use crate::{
    client::ChainClient,
    error::ClientError,
    events::{FilterQuery, RawLog},
    retry::{retry_with_backoff, Backoff},
};
use alloy_primitives::Address;
use std::time::Duration;

/// Fetches the trailing window of logs that a fresh subscription would
/// otherwise miss.
pub(crate) struct BackfillFetcher<'a> {
    client: &'a dyn ChainClient,
    depth: u64,
    request_timeout: Duration,
    backoff: &'a Backoff,
    shutdown: &'a ShutdownSignal,
}

impl<'a> BackfillFetcher<'a> {
    pub fn new(
        client: &'a dyn ChainClient,
        depth: u64,
        request_timeout: Duration,
        backoff: &'a Backoff,
        shutdown: &'a ShutdownSignal,
    ) -> Self {
        Self {
            client,
            depth,
            request_timeout,
            backoff,
            shutdown,
        }
    }

    /// Fetches every log for `addresses` from `depth` blocks behind the head.
    ///
    /// Retries until it succeeds; returns `None` only if shutdown was raised.
    /// Without addresses there is nothing to backfill and no call is made.
    pub async fn fetch(&self, addresses: Vec<Address>) -> Option<Vec<RawLog>> {
        if addresses.is_empty() {
            return Some(Vec::new());
        }
        let addresses = &addresses;
        let logs = retry_with_backoff(self.backoff, self.shutdown, "Backfilling logs", || async move {
            match tokio::time::timeout(self.request_timeout, self.fetch_once(addresses)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(self.request_timeout)),
            }
        })
        .await?;

        tracing::info!(count = logs.len(), depth = self.depth, "Backfilled logs");
        Some(logs)
    }

    async fn fetch_once(&self, addresses: &[Address]) -> Result<Vec<RawLog>, ClientError> {
        let head = self
            .client
            .latest_header()
            .await?
            .ok_or(ClientError::MissingHeader)?;
        let from_block = backfill_start_block(head.number, self.depth);
        tracing::debug!(head = head.number, from_block, "Fetching backfill window");

        let query = FilterQuery::new(addresses.to_vec()).from_block(from_block);
        self.client.filter_logs(&query).await
    }
}

/// The first block of the backfill window; clamps at genesis instead of underflowing.
pub(crate) fn backfill_start_block(current_height: u64, depth: u64) -> u64 {
    current_height.saturating_sub(depth)
}
