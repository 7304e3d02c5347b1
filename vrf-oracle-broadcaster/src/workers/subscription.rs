use super::{shutdown::ShutdownSignal, stream::LogStream};
use crate::{
    client::{ChainClient, ClientSubscription},
    error::ClientError,
    events::FilterQuery,
    retry::{retry_with_backoff, Backoff},
};
use alloy_primitives::Address;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Owns one live subscription, or stands in for one while nobody listens.
///
/// Unsubscribing closes the log stream handed out by [`Self::take_logs`], so
/// whoever drains it terminates cleanly even if the client keeps its sender.
/// A client that closes either channel on its own has lost the subscription.
pub(crate) struct ManagedSubscription {
    logs: Option<LogStream>,
    errors: Option<mpsc::Receiver<ClientError>>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
    closed: watch::Sender<bool>,
    ended: watch::Receiver<bool>,
}

impl ManagedSubscription {
    pub fn new(subscription: ClientSubscription) -> Self {
        let ClientSubscription {
            logs,
            errors,
            unsubscribe,
        } = subscription;
        let (closed, closed_rx) = watch::channel(false);
        let (ended_tx, ended) = watch::channel(false);
        Self {
            logs: Some(LogStream::closable(logs, closed_rx, ended_tx)),
            errors: Some(errors),
            unsubscribe: Some(unsubscribe),
            closed,
            ended,
        }
    }

    /// A subscription that produces no logs and no errors and costs no network call.
    pub fn noop() -> Self {
        let (closed, _) = watch::channel(false);
        let (_, ended) = watch::channel(false);
        Self {
            logs: Some(LogStream::batch(Vec::new())),
            errors: None,
            unsubscribe: None,
            closed,
            ended,
        }
    }

    pub fn take_logs(&mut self) -> Option<LogStream> {
        self.logs.take()
    }

    /// Resolves with the next subscription failure: a reported error, a
    /// closed error channel, or a log stream that ended before
    /// [`Self::unsubscribe`]. Never resolves for the no-op subscription.
    pub async fn next_error(&mut self) -> ClientError {
        let Some(errors) = self.errors.as_mut() else {
            return futures::future::pending().await;
        };
        tokio::select! {
            biased;
            err = errors.recv() => err.unwrap_or_else(|| {
                ClientError::SubscriptionDropped("error channel closed".to_string())
            }),
            Ok(_) = self.ended.wait_for(|ended| *ended) => {
                ClientError::SubscriptionDropped("log stream ended".to_string())
            }
        }
    }

    /// Tears the subscription down. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.closed.send_replace(true);
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for ManagedSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Subscribes to logs of `addresses`, retrying with backoff and a per-attempt
/// timeout. An empty address set yields the no-op subscription without any
/// network call. Returns `None` if shutdown was raised first.
pub(crate) async fn create_subscription(
    client: &dyn ChainClient,
    addresses: Vec<Address>,
    attempt_timeout: Duration,
    backoff: &Backoff,
    shutdown: &ShutdownSignal,
) -> Option<ManagedSubscription> {
    if addresses.is_empty() {
        return Some(ManagedSubscription::noop());
    }
    let query = &FilterQuery::new(addresses);

    let subscription = retry_with_backoff(backoff, shutdown, "Creating log subscription", || async move {
        match tokio::time::timeout(attempt_timeout, client.subscribe_logs(query)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(attempt_timeout)),
        }
    })
    .await?;

    tracing::info!(addresses = query.addresses.len(), "Log subscription established");
    Some(ManagedSubscription::new(subscription))
}
