//! Start-up ordering between services.
//!
//! A service that must not act before its upstream services are ready
//! declares how many it waits on with [`DependentAwaiter::add_dependents`];
//! each upstream calls [`DependentAwaiter::dependent_ready`] once.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct DependentAwaiter {
    pending: Arc<watch::Sender<usize>>,
}

impl Default for DependentAwaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl DependentAwaiter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            pending: Arc::new(tx),
        }
    }

    pub fn add_dependents(&self, count: usize) {
        self.pending.send_modify(|pending| *pending += count);
    }

    pub fn dependent_ready(&self) {
        self.pending.send_modify(|pending| {
            if *pending == 0 {
                tracing::warn!("dependent_ready called more often than dependents were added");
            }
            *pending = pending.saturating_sub(1);
        });
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Resolves once every declared dependent has reported ready.
    /// Resolves immediately when none were declared.
    pub async fn await_dependents(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }
}
