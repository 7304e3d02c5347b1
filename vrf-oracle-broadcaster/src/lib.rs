//! The log broadcasting engine of the VRF oracle node.
//!
//! Many jobs watch the same few contracts. Instead of each job opening its own
//! subscription, they register a [`listener::Listener`] for a contract address
//! with the [`workers::Broadcaster`], which keeps a single subscription for the
//! union of all registered addresses and hands every log to every listener of
//! its address.
//!
//! Whenever the subscription is (re)created, the broadcaster also backfills a
//! trailing window of blocks, so no log falls into the gap between the old and
//! the new subscription. Logs can therefore arrive more than once; listeners
//! make re-processing a no-op through [`broadcast::LogBroadcast::was_already_consumed`]
//! and [`broadcast::LogBroadcast::mark_consumed`].
//!
//! # Key Components
//!
//! *   [`workers::Broadcaster`]: The entry point. Starts and stops the engine and
//!     registers listeners.
//! *   [`client::ChainClient`]: The seam to the chain node (headers, log
//!     filtering, log subscriptions).
//! *   [`storage::ConsumedLogStore`]: The seam to the dedup store.
//! *   [`decoding::DecodingLogListener`]: A listener adapter that decodes logs
//!     with a contract ABI before delegating.
pub mod broadcast;
/// The chain client abstraction the broadcaster subscribes through.
pub mod client;
/// Defines configuration structures for the broadcaster.
pub mod config;
pub mod decoding;
pub mod dependents;
/// The listener registry owned by the control loop.
mod dispatcher;
pub mod error;
/// Chain data types: logs, headers, filters and job identities.
pub mod events;
pub mod listener;
/// Exponential backoff for the broadcaster's network calls.
pub mod retry;
/// A trait and in-memory implementation for consumed-log markers.
pub mod storage;
/// The background workers that keep the subscription alive.
pub mod workers;

pub use broadcast::LogBroadcast;
pub use client::{ChainClient, ClientSubscription};
pub use config::BroadcasterConfig;
pub use error::{BroadcasterError, ClientError, DecodeError};
pub use events::{FilterQuery, Header, JobId, JobIdentity, RawLog};
pub use listener::Listener;
pub use storage::ConsumedLogStore;
pub use workers::Broadcaster;
