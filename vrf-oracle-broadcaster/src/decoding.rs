//! # Decoding Listeners
//!
//! [`DecodingLogListener`] wraps another [`Listener`] and turns raw logs into
//! typed values before handing them on. Which type a log becomes is decided by
//! an explicit table from event selector (`topics[0]`) to decode function,
//! assembled once with [`DecodingLogListener::with_log_type`] or
//! [`DecodingLogListener::with_event`].
//!
//! Logs without topics and logs whose selector is not in the table are
//! dropped without reaching the inner listener. Contracts emit many events a
//! job is not interested in, so neither case is an error; both are counted
//! (see [`DecodingLogListener::dropped_logs`]).

use crate::{
    broadcast::{DecodedLog, LogBroadcast},
    error::DecodeError,
    events::{JobIdentity, RawLog},
    listener::Listener,
};
use alloy_dyn_abi::{DynSolValue, EventExt};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::{Address, Bytes, B256, U256};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// The events of one contract ABI, indexed by selector.
#[derive(Debug, Clone)]
pub struct ContractCodec {
    abi: JsonAbi,
    events: HashMap<B256, Event>,
}

impl ContractCodec {
    pub fn new(abi: JsonAbi) -> Self {
        let events = abi
            .events()
            .filter(|event| !event.anonymous)
            .map(|event| (event.selector(), event.clone()))
            .collect();
        Self { abi, events }
    }

    /// Parses a JSON ABI, as emitted by `solc --abi`.
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        let abi: JsonAbi =
            serde_json::from_str(json).map_err(|e| DecodeError::Abi(e.to_string()))?;
        Ok(Self::new(abi))
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn event_by_id(&self, selector: &B256) -> Option<&Event> {
        self.events.get(selector)
    }

    /// The selector of the first event named `name`.
    pub fn selector_of(&self, name: &str) -> Result<B256, DecodeError> {
        self.abi
            .event(name)
            .and_then(|overloads| overloads.iter().find(|event| !event.anonymous))
            .map(Event::selector)
            .ok_or_else(|| DecodeError::UnknownEventName(name.to_string()))
    }

    /// Decodes the indexed topics and the data of `raw_log` into named fields,
    /// in the order the ABI declares them.
    pub fn unpack_log(&self, raw_log: &RawLog) -> Result<LogFields, DecodeError> {
        let selector = raw_log
            .event_id()
            .ok_or_else(|| DecodeError::invalid_field("topics", "log has no topics"))?;
        let event = self
            .event_by_id(selector)
            .ok_or(DecodeError::UnknownEvent(*selector))?;

        let decoded = event
            .decode_log_parts(raw_log.topics.iter().copied(), &raw_log.data, true)
            .map_err(|e| DecodeError::Abi(e.to_string()))?;

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut fields = Vec::with_capacity(event.inputs.len());
        for input in &event.inputs {
            let value = if input.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let value = value.ok_or_else(|| {
                DecodeError::Abi(format!("missing value for parameter '{}'", input.name))
            })?;
            fields.push((input.name.clone(), value));
        }

        Ok(LogFields {
            event: event.name.clone(),
            fields,
        })
    }
}

/// The decoded parameters of one log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFields {
    event: String,
    fields: Vec<(String, DynSolValue)>,
}

impl LogFields {
    pub fn event_name(&self) -> &str {
        &self.event
    }

    pub fn value(&self, name: &str) -> Option<&DynSolValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DynSolValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn uint(&self, name: &'static str) -> Result<U256, DecodeError> {
        self.require(name)?
            .as_uint()
            .map(|(value, _)| value)
            .ok_or_else(|| DecodeError::invalid_field(name, "expected an unsigned integer"))
    }

    pub fn address(&self, name: &'static str) -> Result<Address, DecodeError> {
        self.require(name)?
            .as_address()
            .ok_or_else(|| DecodeError::invalid_field(name, "expected an address"))
    }

    pub fn bytes32(&self, name: &'static str) -> Result<B256, DecodeError> {
        match self.require(name)?.as_fixed_bytes() {
            Some((bytes, 32)) => Ok(B256::from_slice(bytes)),
            _ => Err(DecodeError::invalid_field(name, "expected bytes32")),
        }
    }

    pub fn bytes(&self, name: &'static str) -> Result<Bytes, DecodeError> {
        self.require(name)?
            .as_bytes()
            .map(|bytes| Bytes::copy_from_slice(bytes))
            .ok_or_else(|| DecodeError::invalid_field(name, "expected dynamic bytes"))
    }

    fn require(&self, name: &'static str) -> Result<&DynSolValue, DecodeError> {
        self.value(name)
            .ok_or_else(|| DecodeError::invalid_field(name, "not present in the event"))
    }
}

/// A typed log that can be built from its raw form and decoded fields.
pub trait FromDecodedLog: Sized + Send + Sync + 'static {
    fn from_decoded_log(raw_log: &RawLog, fields: &LogFields) -> Result<Self, DecodeError>;
}

type DecodeFn = fn(&RawLog, &LogFields) -> Result<DecodedLog, DecodeError>;

fn decode_as<T: FromDecodedLog>(
    raw_log: &RawLog,
    fields: &LogFields,
) -> Result<DecodedLog, DecodeError> {
    Ok(Arc::new(T::from_decoded_log(raw_log, fields)?))
}

/// How many logs a [`DecodingLogListener`] discarded, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DroppedLogs {
    pub missing_topics: u64,
    pub unregistered_event: u64,
}

#[derive(Debug, Default)]
struct DropCounters {
    missing_topics: AtomicU64,
    unregistered_event: AtomicU64,
}

/// A [`Listener`] that decodes logs before passing them to an inner listener.
///
/// On success the inner listener receives the broadcast with its decoded log
/// set (read it back with [`LogBroadcast::decoded_log`]). A log that matches a
/// registered selector but fails to decode reaches the inner listener as an
/// `Err`.
pub struct DecodingLogListener {
    codec: Arc<ContractCodec>,
    decoders: HashMap<B256, DecodeFn>,
    inner: Arc<dyn Listener>,
    dropped: DropCounters,
}

impl DecodingLogListener {
    pub fn new(codec: Arc<ContractCodec>, inner: Arc<dyn Listener>) -> Self {
        Self {
            codec,
            decoders: HashMap::new(),
            inner,
            dropped: DropCounters::default(),
        }
    }

    /// Decodes logs with this `selector` into `T`.
    pub fn with_log_type<T: FromDecodedLog>(mut self, selector: B256) -> Self {
        self.decoders.insert(selector, decode_as::<T>);
        self
    }

    /// Decodes the event called `name` in the codec's ABI into `T`.
    pub fn with_event<T: FromDecodedLog>(self, name: &str) -> Result<Self, DecodeError> {
        let selector = self.codec.selector_of(name)?;
        Ok(self.with_log_type::<T>(selector))
    }

    pub fn dropped_logs(&self) -> DroppedLogs {
        DroppedLogs {
            missing_topics: self.dropped.missing_topics.load(Ordering::Relaxed),
            unregistered_event: self.dropped.unregistered_event.load(Ordering::Relaxed),
        }
    }

    fn decode(&self, broadcast: LogBroadcast) -> Option<Result<LogBroadcast, DecodeError>> {
        let raw_log = broadcast.raw_log();
        let Some(selector) = raw_log.event_id() else {
            self.dropped.missing_topics.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                address = %raw_log.address,
                tx = %raw_log.transaction_hash,
                "Dropping log without topics"
            );
            return None;
        };
        let Some(decode) = self.decoders.get(selector) else {
            self.dropped.unregistered_event.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                address = %raw_log.address,
                selector = %selector,
                "Dropping log of unregistered event"
            );
            return None;
        };

        let decoded = self
            .codec
            .unpack_log(raw_log)
            .and_then(|fields| decode(raw_log, &fields));
        Some(
            decoded
                .and_then(|decoded| broadcast.set_decoded_log_arc(decoded))
                .map(|()| broadcast),
        )
    }
}

impl Listener for DecodingLogListener {
    fn on_connect(&self) {
        self.inner.on_connect();
    }

    fn on_disconnect(&self) {
        self.inner.on_disconnect();
    }

    fn handle_log(&self, log: Result<LogBroadcast, DecodeError>) {
        let log = match log {
            Ok(broadcast) => match self.decode(broadcast) {
                Some(log) => log,
                None => return,
            },
            Err(e) => Err(e),
        };
        if let Err(e) = &log {
            tracing::warn!(job = %self.inner.job_identity(), error = %e, "Failed to decode log");
        }
        self.inner.handle_log(log);
    }

    fn job_identity(&self) -> JobIdentity {
        self.inner.job_identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::JobId,
        listener::{ChannelListener, ListenerEvent},
        storage::MemoryConsumedLogStore,
    };
    use alloy_primitives::{address, b256};

    const VRF_ABI: &str = r#"[
        {
            "type": "event",
            "name": "RandomnessRequest",
            "anonymous": false,
            "inputs": [
                { "name": "keyHash", "type": "bytes32", "indexed": false },
                { "name": "seed", "type": "uint256", "indexed": false },
                { "name": "jobID", "type": "bytes32", "indexed": true },
                { "name": "sender", "type": "address", "indexed": false },
                { "name": "fee", "type": "uint256", "indexed": false },
                { "name": "requestID", "type": "bytes32", "indexed": false }
            ]
        },
        {
            "type": "event",
            "name": "RandomnessRequestFulfilled",
            "anonymous": false,
            "inputs": [
                { "name": "requestId", "type": "bytes32", "indexed": false },
                { "name": "output", "type": "uint256", "indexed": false }
            ]
        }
    ]"#;

    const KEY_HASH: B256 =
        b256!("1111111111111111111111111111111111111111111111111111111111111111");
    const JOB_TOPIC: B256 =
        b256!("2222222222222222222222222222222222222222222222222222222222222222");
    const REQUEST_ID: B256 =
        b256!("3333333333333333333333333333333333333333333333333333333333333333");
    const SENDER: Address = address!("00000000000000000000000000000000000000aa");

    #[derive(Debug)]
    struct RandomnessRequest {
        raw: RawLog,
        key_hash: B256,
        seed: U256,
        job_id: B256,
        sender: Address,
        request_id: B256,
    }

    impl FromDecodedLog for RandomnessRequest {
        fn from_decoded_log(raw_log: &RawLog, fields: &LogFields) -> Result<Self, DecodeError> {
            Ok(Self {
                raw: raw_log.clone(),
                key_hash: fields.bytes32("keyHash")?,
                seed: fields.uint("seed")?,
                job_id: fields.bytes32("jobID")?,
                sender: fields.address("sender")?,
                request_id: fields.bytes32("requestID")?,
            })
        }
    }

    fn codec() -> Arc<ContractCodec> {
        Arc::new(ContractCodec::from_json(VRF_ABI).unwrap())
    }

    fn request_log(codec: &ContractCodec) -> RawLog {
        let data = DynSolValue::Tuple(vec![
            DynSolValue::FixedBytes(KEY_HASH, 32),
            DynSolValue::Uint(U256::from(42u64), 256),
            DynSolValue::Address(SENDER),
            DynSolValue::Uint(U256::from(1_000u64), 256),
            DynSolValue::FixedBytes(REQUEST_ID, 32),
        ])
        .abi_encode_params();
        RawLog {
            topics: vec![codec.selector_of("RandomnessRequest").unwrap(), JOB_TOPIC],
            data: data.into(),
            block_number: 7,
            log_index: 3,
            ..Default::default()
        }
    }

    fn broadcast(raw_log: RawLog) -> LogBroadcast {
        LogBroadcast::new(
            raw_log,
            JobIdentity::V1(JobId::new_random()),
            Arc::new(MemoryConsumedLogStore::new()),
        )
    }

    #[test]
    fn unpacks_indexed_and_body_fields_in_abi_order() {
        let codec = codec();
        let fields = codec.unpack_log(&request_log(&codec)).unwrap();

        assert_eq!(fields.event_name(), "RandomnessRequest");
        let names: Vec<&str> = fields.iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            ["keyHash", "seed", "jobID", "sender", "fee", "requestID"]
        );
        assert_eq!(fields.bytes32("jobID").unwrap(), JOB_TOPIC);
        assert_eq!(fields.uint("fee").unwrap(), U256::from(1_000u64));
        assert!(matches!(
            fields.address("seed"),
            Err(DecodeError::InvalidField { field: "seed", .. })
        ));
    }

    #[test]
    fn unknown_event_name_is_a_construction_error() {
        let (inner, _rx) = ChannelListener::new(JobIdentity::V2(1));
        let result =
            DecodingLogListener::new(codec(), inner).with_event::<RandomnessRequest>("Nope");
        assert!(matches!(result, Err(DecodeError::UnknownEventName(name)) if name == "Nope"));
    }

    #[test]
    fn decodes_registered_events_for_inner_listener() {
        let codec = codec();
        let (inner, mut rx) = ChannelListener::new(JobIdentity::V2(1));
        let listener = DecodingLogListener::new(codec.clone(), inner)
            .with_event::<RandomnessRequest>("RandomnessRequest")
            .unwrap();

        listener.handle_log(Ok(broadcast(request_log(&codec))));

        let Ok(ListenerEvent::Log(delivered)) = rx.try_recv() else {
            panic!("expected a decoded log");
        };
        let request = delivered.decoded_log::<RandomnessRequest>().unwrap();
        assert_eq!(request.key_hash, KEY_HASH);
        assert_eq!(request.seed, U256::from(42u64));
        assert_eq!(request.job_id, JOB_TOPIC);
        assert_eq!(request.sender, SENDER);
        assert_eq!(request.request_id, REQUEST_ID);
        assert_eq!(request.raw.log_index, 3);
    }

    #[test]
    fn drops_logs_without_topics_or_registration() {
        let codec = codec();
        let (inner, mut rx) = ChannelListener::new(JobIdentity::V2(1));
        let listener = DecodingLogListener::new(codec.clone(), inner)
            .with_event::<RandomnessRequest>("RandomnessRequest")
            .unwrap();

        listener.handle_log(Ok(broadcast(RawLog::default())));
        let fulfilled = RawLog {
            topics: vec![codec.selector_of("RandomnessRequestFulfilled").unwrap()],
            ..Default::default()
        };
        listener.handle_log(Ok(broadcast(fulfilled)));

        assert!(rx.try_recv().is_err());
        assert_eq!(
            listener.dropped_logs(),
            DroppedLogs {
                missing_topics: 1,
                unregistered_event: 1,
            }
        );
    }

    #[test]
    fn malformed_payload_reaches_inner_listener_as_error() {
        let codec = codec();
        let (inner, mut rx) = ChannelListener::new(JobIdentity::V2(1));
        let listener = DecodingLogListener::new(codec.clone(), inner)
            .with_event::<RandomnessRequest>("RandomnessRequest")
            .unwrap();

        let mut raw_log = request_log(&codec);
        raw_log.data = Bytes::from_static(&[0xde, 0xad]);
        listener.handle_log(Ok(broadcast(raw_log)));

        assert!(matches!(
            rx.try_recv(),
            Ok(ListenerEvent::Error(DecodeError::Abi(_)))
        ));
        assert_eq!(listener.dropped_logs(), DroppedLogs::default());
    }
}
