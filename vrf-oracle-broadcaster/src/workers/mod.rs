//! # Broadcaster & Background Workers
//!
//! This module defines the [`Broadcaster`], the public handle of the log
//! broadcasting engine, and the background machinery behind it.
//!
//! ## Core Components
//!
//! - [`Broadcaster`]: A clonable, thread-safe handle. It starts and stops the
//!   engine and registers listeners for contract addresses.
//! - **Workers**:
//!   - `ControlLoop`: The single task that owns the listener registry and the
//!     live subscription. It runs the resubscribe state machine.
//!   - `BackfillFetcher`: Fetches the trailing block window whenever a
//!     subscription is (re)created.
//!   - `ManagedSubscription`: One live log subscription, or the no-op stand-in
//!     used while no listener is registered.
//!   - Stream fan-in tasks that chain the leftover, backfilled and live logs.

mod backfill;
mod control;
pub(crate) mod shutdown;
mod stream;
mod subscription;

use crate::{
    client::ChainClient,
    config::BroadcasterConfig,
    dependents::DependentAwaiter,
    dispatcher::Dispatcher,
    error::BroadcasterError,
    listener::Listener,
    storage::ConsumedLogStore,
};
use alloy_primitives::Address;
use control::{Command, ControlLoop};
use shutdown::{Shutdown, ShutdownSignal};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

enum Lifecycle {
    Created(ControlLoop),
    Running(JoinHandle<()>),
    Stopped,
}

struct Inner {
    command_tx: mpsc::Sender<Command>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: Shutdown,
    signal: ShutdownSignal,
    connected: Arc<AtomicBool>,
    dependents: DependentAwaiter,
}

/// A clonable, thread-safe handle to the log broadcasting engine.
///
/// Listeners register interest in contract addresses; the engine keeps one
/// subscription covering every registered address and delivers each log to
/// every listener of its address.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("connected", &self.is_connected())
            .field("pending_dependents", &self.inner.dependents.pending())
            .finish_non_exhaustive()
    }
}

impl Broadcaster {
    /// Creates the broadcaster without starting it.
    ///
    /// # Arguments
    ///
    /// * `config` - The shared engine configuration.
    /// * `client` - The chain client used for subscriptions and backfills.
    /// * `store` - The dedup store handed to every [`crate::broadcast::LogBroadcast`].
    pub fn new(
        config: Arc<BroadcasterConfig>,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn ConsumedLogStore>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.channels.command_buffer.max(1));
        let (shutdown, signal) = Shutdown::new();
        let connected = Arc::new(AtomicBool::new(false));
        let dependents = DependentAwaiter::new();

        let control = ControlLoop::new(
            config,
            client,
            Dispatcher::new(store, connected.clone()),
            command_rx,
            dependents.clone(),
            signal.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                command_tx,
                lifecycle: Mutex::new(Lifecycle::Created(control)),
                shutdown,
                signal,
                connected,
                dependents,
            }),
        }
    }

    /// Spawns the control loop on the current tokio runtime.
    pub fn start(&self) -> Result<(), BroadcasterError> {
        let mut lifecycle = self.lock_lifecycle();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Created(control) => {
                tracing::info!("Starting log broadcaster");
                *lifecycle = Lifecycle::Running(tokio::spawn(control.run()));
                Ok(())
            }
            running @ Lifecycle::Running(_) => {
                *lifecycle = running;
                Err(BroadcasterError::AlreadyStarted)
            }
            Lifecycle::Stopped => Err(BroadcasterError::AlreadyStarted),
        }
    }

    /// Raises the shutdown signal and waits until the control loop and all of
    /// its helper tasks have exited.
    pub async fn stop(&self) -> Result<(), BroadcasterError> {
        let handle = {
            let mut lifecycle = self.lock_lifecycle();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(handle) => handle,
                Lifecycle::Stopped => return Err(BroadcasterError::AlreadyStopped),
                created @ Lifecycle::Created(_) => {
                    *lifecycle = created;
                    return Err(BroadcasterError::NotStarted);
                }
            }
        };

        tracing::info!("Stopping log broadcaster");
        self.inner.shutdown.raise();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Broadcaster control loop terminated abnormally");
        }
        Ok(())
    }

    /// Registers `listener` for logs emitted by `address`.
    ///
    /// Waits until the control loop has accepted the registration and returns
    /// whether the broadcaster was connected at that moment. Returns `false`
    /// without registering once shutdown is in progress.
    ///
    /// # Panics
    ///
    /// The control loop panics if the same listener is registered twice for
    /// the same address.
    pub async fn register(&self, address: Address, listener: Arc<dyn Listener>) -> bool {
        let (ack, ack_rx) = oneshot::channel();
        let command = Command::Register {
            address,
            listener,
            ack,
        };
        if !self.send(command).await {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.inner.signal.wait() => false,
            connected = ack_rx => connected.unwrap_or(false),
        }
    }

    /// Removes `listener` from `address`. The listener is notified of the
    /// disconnect before this returns. A no-op once shutdown is in progress.
    pub async fn unregister(&self, address: Address, listener: Arc<dyn Listener>) {
        let (ack, ack_rx) = oneshot::channel();
        let command = Command::Unregister {
            address,
            listener,
            ack,
        };
        if !self.send(command).await {
            return;
        }
        tokio::select! {
            biased;
            _ = self.inner.signal.wait() => {}
            _ = ack_rx => {}
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Declares `count` more upstream services that must report ready before
    /// the broadcaster subscribes to anything.
    pub fn add_dependents(&self, count: usize) {
        self.inner.dependents.add_dependents(count);
    }

    pub fn dependent_ready(&self) {
        self.inner.dependents.dependent_ready();
    }

    async fn send(&self, command: Command) -> bool {
        tokio::select! {
            biased;
            _ = self.inner.signal.wait() => false,
            sent = self.inner.command_tx.send(command) => sent.is_ok(),
        }
    }

    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
