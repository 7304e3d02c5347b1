#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The top-level configuration for the log broadcaster.
///
/// This struct aggregates backfill, subscription, retry and channel
/// settings. It is typically deserialized as a section of the node
/// configuration and passed to the `Broadcaster` upon creation.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct BroadcasterConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub backfill: BackfillConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub subscription: SubscriptionConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub retry: RetryConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub channels: ChannelConfig,
}

/// Defines how much history is re-fetched every time the subscription is recreated.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct BackfillConfig {
    /// The number of blocks behind the head to start backfilling from.
    pub depth: u64,
    /// Upper bound for a single header + log query round trip.
    pub request_timeout_secs: u64,
}

/// Defines behavior of the live log subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct SubscriptionConfig {
    /// Upper bound for a single subscription attempt.
    pub create_timeout_secs: u64,
    /// Quiet window for coalescing registry changes into one resubscription.
    pub debounce_millis: u64,
}

/// Exponential backoff applied to subscription and backfill attempts.
/// Retrying never gives up; it only stops on success or shutdown.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct RetryConfig {
    pub initial_backoff_millis: u64,
    pub max_backoff_millis: u64,
    pub multiplier: f64,
}

/// Defines capacities for the MPSC channels within the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct ChannelConfig {
    /// The buffer capacity for register/unregister requests to the control loop.
    pub command_buffer: usize,
    /// The buffer capacity of every intermediate log stream.
    pub log_buffer: usize,
}

impl BackfillConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SubscriptionConfig {
    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_millis)
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_millis)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_millis)
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            depth: 10,
            request_timeout_secs: 30,
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            create_timeout_secs: 15,
            debounce_millis: 1000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_millis: 1000,
            max_backoff_millis: 10_000,
            multiplier: 2.0,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer: 128,
            log_buffer: 256,
        }
    }
}
