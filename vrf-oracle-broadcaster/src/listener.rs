//! # Log Listeners
//!
//! A [`Listener`] is anything that wants logs for one or more contract
//! addresses. The broadcaster calls it from its control loop, so
//! implementations should hand work off quickly (e.g. into a channel or a
//! spawned task) rather than block.
//!
//! [`ChannelListener`] is the ready-made variant: it turns every callback into
//! a [`ListenerEvent`] on an unbounded channel, which lets application code
//! consume logs with plain `recv().await`.

use crate::{broadcast::LogBroadcast, error::DecodeError, events::JobIdentity};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The capability set the broadcaster requires from each registered party.
pub trait Listener: Send + Sync {
    /// Called once a subscription covering this listener's address is live.
    fn on_connect(&self);

    /// Called when the subscription is lost, when the broadcaster stops, and
    /// when this listener is unregistered.
    fn on_disconnect(&self);

    /// Receives one log, or an error produced while preparing it for this listener.
    fn handle_log(&self, log: Result<LogBroadcast, DecodeError>);

    /// The identity under which consumed-log markers are recorded.
    fn job_identity(&self) -> JobIdentity;
}

/// The callbacks of a [`Listener`], as values.
#[derive(Debug)]
pub enum ListenerEvent {
    Connected,
    Disconnected,
    Log(LogBroadcast),
    Error(DecodeError),
}

/// A [`Listener`] that forwards every callback to a channel.
#[derive(Debug)]
pub struct ChannelListener {
    job: JobIdentity,
    tx: mpsc::UnboundedSender<ListenerEvent>,
}

impl ChannelListener {
    pub fn new(job: JobIdentity) -> (Arc<Self>, mpsc::UnboundedReceiver<ListenerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { job, tx }), rx)
    }

    fn forward(&self, event: ListenerEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(job = %self.job, "Listener receiver dropped, discarding notification");
        }
    }
}

impl Listener for ChannelListener {
    fn on_connect(&self) {
        self.forward(ListenerEvent::Connected);
    }

    fn on_disconnect(&self) {
        self.forward(ListenerEvent::Disconnected);
    }

    fn handle_log(&self, log: Result<LogBroadcast, DecodeError>) {
        match log {
            Ok(broadcast) => self.forward(ListenerEvent::Log(broadcast)),
            Err(err) => self.forward(ListenerEvent::Error(err)),
        }
    }

    fn job_identity(&self) -> JobIdentity {
        self.job
    }
}

/// The identity of a registered listener inside the registry: the address of
/// its allocation. Two `Arc`s to the same listener compare equal.
pub(crate) fn listener_key(listener: &Arc<dyn Listener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}
