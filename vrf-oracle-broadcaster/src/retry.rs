//! Exponential backoff for operations that must eventually succeed.

use crate::{config::RetryConfig, workers::shutdown::ShutdownSignal};
use std::{fmt::Display, future::Future, time::Duration};

/// Stateless backoff policy: computes the delay before the next attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay after the `attempt`-th failure (1-based), capped at
    /// the configured maximum.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.initial_backoff().as_millis() as f64
            * self.config.multiplier.max(1.0).powi(exponent);
        let cap_ms = self.config.max_backoff().as_millis() as f64;
        Duration::from_millis(base_ms.min(cap_ms) as u64)
    }
}

/// Runs `op` until it succeeds, sleeping with exponential backoff between
/// failures. Returns `None` as soon as `shutdown` is raised, whether that
/// happens during an attempt or during a backoff sleep.
pub(crate) async fn retry_with_backoff<T, E, F, Fut>(
    backoff: &Backoff,
    shutdown: &ShutdownSignal,
    what: &str,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        if shutdown.is_raised() {
            return None;
        }
        let result = tokio::select! {
            biased;
            _ = shutdown.wait() => return None,
            result = op() => result,
        };
        match result {
            Ok(value) => return Some(value),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let delay = backoff.delay(attempt);
                tracing::error!(error = %err, attempt, ?delay, "{} failed, retrying", what);
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
