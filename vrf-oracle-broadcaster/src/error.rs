use alloy_primitives::B256;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle misuse of a [`crate::workers::Broadcaster`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcasterError {
    #[error("Broadcaster is already started")]
    AlreadyStarted,

    #[error("Broadcaster is already stopped")]
    AlreadyStopped,

    #[error("Broadcaster was never started")]
    NotStarted,
}

/// Failures reported by a [`crate::client::ChainClient`].
///
/// The broadcaster never propagates these to listeners; it logs them and
/// retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("chain client returned no latest block header")]
    MissingHeader,

    #[error("subscription dropped: {0}")]
    SubscriptionDropped(String),
}

/// Errors surfaced to a single listener through its `handle_log` call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("event {0} is not part of the contract ABI")]
    UnknownEvent(B256),

    #[error("no event named '{0}' in the contract ABI")]
    UnknownEventName(String),

    #[error("failed to decode log: {0}")]
    Abi(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("decoded log was already set on this broadcast")]
    AlreadyDecoded,
}

impl DecodeError {
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
