use tokio::sync::watch;

/// The raising side of the broadcaster-wide shutdown signal.
#[derive(Debug)]
pub(crate) struct Shutdown {
    tx: watch::Sender<bool>,
}

/// A cloneable view of the shutdown signal. Every blocking operation in the
/// broadcaster selects on [`ShutdownSignal::wait`].
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSignal { rx })
    }

    /// Raises the signal. Raising twice is a no-op.
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }
}

impl ShutdownSignal {
    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is raised, or once the raising side is gone.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|raised| *raised).await;
    }
}
