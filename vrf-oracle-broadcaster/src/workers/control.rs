use super::{
    backfill::BackfillFetcher,
    shutdown::ShutdownSignal,
    stream::{append_log_stream, LogStream},
    subscription::{create_subscription, ManagedSubscription},
};
use crate::{
    client::ChainClient,
    config::BroadcasterConfig,
    dependents::DependentAwaiter,
    dispatcher::Dispatcher,
    error::ClientError,
    events::RawLog,
    listener::Listener,
    retry::Backoff,
};
use alloy_primitives::Address;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinSet,
    time::{interval_at, Instant, MissedTickBehavior},
};

/// Requests delivered to the control loop.
pub(crate) enum Command {
    Register {
        address: Address,
        listener: Arc<dyn Listener>,
        ack: oneshot::Sender<bool>,
    },
    Unregister {
        address: Address,
        listener: Arc<dyn Listener>,
        ack: oneshot::Sender<()>,
    },
}

/// How the event-processing phase ended.
enum ProcessOutcome {
    /// The address set changed; recreate the subscription.
    Resubscribe,
    /// The subscription failed; reconnect.
    ConnectionLost(ClientError),
    Shutdown,
}

/// The single task that owns the listener registry and the live subscription.
///
/// Nothing else touches its state: registrations, logs, subscription errors,
/// timers and shutdown all reach it through channels.
pub(crate) struct ControlLoop {
    config: Arc<BroadcasterConfig>,
    client: Arc<dyn ChainClient>,
    dispatcher: Dispatcher,
    command_rx: mpsc::Receiver<Command>,
    dependents: DependentAwaiter,
    shutdown: ShutdownSignal,
    backoff: Backoff,
    helpers: JoinSet<()>,
}

impl ControlLoop {
    pub fn new(
        config: Arc<BroadcasterConfig>,
        client: Arc<dyn ChainClient>,
        dispatcher: Dispatcher,
        command_rx: mpsc::Receiver<Command>,
        dependents: DependentAwaiter,
        shutdown: ShutdownSignal,
    ) -> Self {
        let backoff = Backoff::new(config.retry.clone());
        Self {
            config,
            client,
            dispatcher,
            command_rx,
            dependents,
            shutdown,
            backoff,
            helpers: JoinSet::new(),
        }
    }

    /// Runs until shutdown. Returns only after every helper task has exited.
    pub async fn run(mut self) {
        if self.await_dependencies().await {
            tracing::info!("Dependencies ready, starting log subscription");
            self.resubscribe_loop().await;
        }
        while self.helpers.join_next().await.is_some() {}
        tracing::info!("Broadcaster control loop exited");
    }

    /// Accepts registrations without connecting until every declared
    /// dependency is ready. Returns `false` if shutdown came first.
    async fn await_dependencies(&mut self) -> bool {
        let dependents = self.dependents.clone();
        let ready = dependents.await_dependents();
        tokio::pin!(ready);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => return false,
                _ = &mut ready => return true,
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command);
                }
            }
        }
    }

    /// The resubscribe state machine. Each pass:
    ///
    /// 1. subscribes for the current address set,
    /// 2. backfills the trailing window,
    /// 3. chains previous leftovers, backfill and new live logs,
    /// 4. tears down the previous subscription,
    /// 5. notifies listeners of the connection,
    /// 6. processes logs and requests until a resubscribe, error or shutdown.
    async fn resubscribe_loop(&mut self) {
        let mut subscription = ManagedSubscription::noop();
        let mut logs: Option<LogStream> = None;

        loop {
            let Some(mut new_subscription) = self.subscribe_phase().await else {
                break;
            };
            let Some(backfilled) = self.backfill_phase().await else {
                new_subscription.unsubscribe();
                break;
            };

            logs = self.append(logs, Some(LogStream::batch(backfilled)));
            logs = self.append(logs, new_subscription.take_logs());

            subscription.unsubscribe();
            subscription = new_subscription;

            self.dispatcher.notify_connect();

            match self.process(&mut subscription, &mut logs).await {
                ProcessOutcome::Resubscribe => {
                    tracing::info!(addresses = ?self.dispatcher.addresses(), "Address set changed, resubscribing");
                }
                ProcessOutcome::ConnectionLost(err) => {
                    tracing::error!(error = %err, "Log subscription failed, reconnecting");
                    self.dispatcher.notify_disconnect();
                }
                ProcessOutcome::Shutdown => break,
            }
        }

        if self.dispatcher.is_connected() {
            self.dispatcher.notify_disconnect();
        }
        subscription.unsubscribe();
    }

    async fn subscribe_phase(&self) -> Option<ManagedSubscription> {
        create_subscription(
            self.client.as_ref(),
            self.dispatcher.addresses(),
            self.config.subscription.create_timeout(),
            &self.backoff,
            &self.shutdown,
        )
        .await
    }

    async fn backfill_phase(&self) -> Option<Vec<RawLog>> {
        BackfillFetcher::new(
            self.client.as_ref(),
            self.config.backfill.depth,
            self.config.backfill.request_timeout(),
            &self.backoff,
            &self.shutdown,
        )
        .fetch(self.dispatcher.addresses())
        .await
    }

    fn append(&mut self, first: Option<LogStream>, second: Option<LogStream>) -> Option<LogStream> {
        append_log_stream(
            first,
            second,
            self.config.channels.log_buffer,
            &self.shutdown,
            &mut self.helpers,
        )
    }

    async fn process(
        &mut self,
        subscription: &mut ManagedSubscription,
        logs: &mut Option<LogStream>,
    ) -> ProcessOutcome {
        let period = self.config.subscription.debounce();
        let mut debounce = interval_at(Instant::now() + period, period);
        debounce.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut needs_resubscribe = false;
        let mut logs_open = logs.is_some();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => return ProcessOutcome::Shutdown,
                err = subscription.next_error() => return ProcessOutcome::ConnectionLost(err),
                _ = debounce.tick() => {
                    if needs_resubscribe {
                        return ProcessOutcome::Resubscribe;
                    }
                }
                Some(command) = self.command_rx.recv() => {
                    needs_resubscribe |= self.handle_command(command);
                }
                raw_log = next_log(logs), if logs_open => match raw_log {
                    Some(raw_log) => self.dispatcher.dispatch(&raw_log),
                    None => logs_open = false,
                },
            }
        }
    }

    /// Applies a registry change. Returns `true` if the address set changed.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Register {
                address,
                listener,
                ack,
            } => {
                let changed = self.dispatcher.add_listener(address, listener);
                let _ = ack.send(self.dispatcher.is_connected());
                changed
            }
            Command::Unregister {
                address,
                listener,
                ack,
            } => {
                let changed = self.dispatcher.remove_listener(address, &listener);
                let _ = ack.send(());
                changed
            }
        }
    }
}

async fn next_log(logs: &mut Option<LogStream>) -> Option<RawLog> {
    match logs {
        Some(stream) => stream.recv().await,
        None => None,
    }
}
