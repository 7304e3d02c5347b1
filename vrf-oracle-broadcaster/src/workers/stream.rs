//! Log streams consumed by the control loop.
//!
//! Every resubscription rebuilds the control loop's input as
//!
//! ```text
//! remaining logs of the previous stream -> backfilled logs -> new live logs
//! ```
//!
//! by chaining streams with [`append_log_stream`]. The chain may repeat logs;
//! listeners deduplicate through their broadcasts.

use super::shutdown::ShutdownSignal;
use crate::events::RawLog;
use std::collections::VecDeque;
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
};

pub(crate) enum LogStream {
    /// A finite, already fetched batch (backfill).
    Batch(VecDeque<RawLog>),
    /// A channel that ends when all senders are gone.
    Channel(mpsc::Receiver<RawLog>),
    /// A channel that additionally ends once `closed` flips, after handing
    /// out whatever was buffered at that moment. Flags `ended` if the sender
    /// side goes away before that.
    Closable {
        rx: mpsc::Receiver<RawLog>,
        closed: watch::Receiver<bool>,
        ended: watch::Sender<bool>,
        draining: bool,
    },
}

impl LogStream {
    pub fn batch(logs: Vec<RawLog>) -> Self {
        Self::Batch(logs.into())
    }

    pub fn closable(
        rx: mpsc::Receiver<RawLog>,
        closed: watch::Receiver<bool>,
        ended: watch::Sender<bool>,
    ) -> Self {
        Self::Closable {
            rx,
            closed,
            ended,
            draining: false,
        }
    }

    /// Receives the next log; `None` marks the end of the stream.
    pub async fn recv(&mut self) -> Option<RawLog> {
        match self {
            LogStream::Batch(logs) => logs.pop_front(),
            LogStream::Channel(rx) => rx.recv().await,
            LogStream::Closable {
                rx,
                closed,
                ended,
                draining,
            } => {
                if !*draining {
                    tokio::select! {
                        biased;
                        log = rx.recv() => {
                            if log.is_none() && !*closed.borrow() {
                                ended.send_replace(true);
                            }
                            return log;
                        }
                        _ = async { let _ = closed.wait_for(|closed| *closed).await; } => {
                            *draining = true;
                            rx.close();
                        }
                    }
                }
                rx.try_recv().ok()
            }
        }
    }
}

/// Chains `first` and `second` into a new stream. The forwarding task is
/// spawned on `tasks` and exits once both inputs are exhausted or the
/// consumer goes away, or on shutdown. Forwarders that already finished are
/// reaped from `tasks` first.
pub(crate) fn append_log_stream(
    first: Option<LogStream>,
    second: Option<LogStream>,
    capacity: usize,
    shutdown: &ShutdownSignal,
    tasks: &mut JoinSet<()>,
) -> Option<LogStream> {
    while let Some(finished) = tasks.try_join_next() {
        if let Err(err) = finished {
            tracing::warn!(error = %err, "Log forwarding task aborted");
        }
    }
    if first.is_none() && second.is_none() {
        return None;
    }
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shutdown = shutdown.clone();

    tasks.spawn(async move {
        for mut stream in [first, second].into_iter().flatten() {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.wait() => return,
                    next = stream.recv() => next,
                };
                let Some(log) = next else { break };
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => return,
                    sent = tx.send(log) => if sent.is_err() { return },
                }
            }
        }
    });

    Some(LogStream::Channel(rx))
}
