//! # Log Dispatcher
//!
//! The `Dispatcher` is the listener registry of the broadcaster: a map from
//! contract address to the listeners interested in that address.
//!
//! ## Ownership
//! It is owned by the broadcaster's control loop and never shared, so it
//! needs no locking. Every mutation arrives as a message on the control
//! loop's command channel and is applied here in arrival order.
//!
//! ## Routing
//! Each incoming log is forwarded only to the listeners registered for the
//! log's address, each in its own freshly built [`LogBroadcast`].
use crate::{
    broadcast::LogBroadcast,
    events::RawLog,
    listener::{listener_key, Listener},
    storage::ConsumedLogStore,
};
use alloy_primitives::Address;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

pub(crate) struct Dispatcher {
    listeners: BTreeMap<Address, HashMap<usize, Arc<dyn Listener>>>,
    store: Arc<dyn ConsumedLogStore>,
    connected: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ConsumedLogStore>, connected: Arc<AtomicBool>) -> Self {
        Self {
            listeners: BTreeMap::new(),
            store,
            connected,
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The set of addresses with at least one listener, in ascending order.
    pub fn addresses(&self) -> Vec<Address> {
        self.listeners.keys().copied().collect()
    }

    #[cfg(test)]
    pub fn listener_count(&self, address: &Address) -> usize {
        self.listeners.get(address).map_or(0, HashMap::len)
    }

    /// Adds a listener. Returns `true` if the address was not known before,
    /// in which case the live subscription must be recreated to include it.
    ///
    /// # Panics
    ///
    /// Registering the same `(address, listener)` pair twice is a programming
    /// error and panics.
    pub fn add_listener(&mut self, address: Address, listener: Arc<dyn Listener>) -> bool {
        let known_address = self.listeners.contains_key(&address);
        let listeners = self.listeners.entry(address).or_default();
        if listeners.insert(listener_key(&listener), listener).is_some() {
            panic!("registration already exists for address {address}");
        }
        tracing::info!(%address, "Registered listener");
        !known_address
    }

    /// Removes a listener and notifies it of the disconnect. Returns `true`
    /// if it was the last listener for `address`, in which case the live
    /// subscription must be recreated without it.
    pub fn remove_listener(&mut self, address: Address, listener: &Arc<dyn Listener>) -> bool {
        listener.on_disconnect();

        let Some(listeners) = self.listeners.get_mut(&address) else {
            tracing::warn!(%address, "Unregister for an address without listeners");
            return false;
        };
        listeners.remove(&listener_key(listener));
        tracing::info!(%address, "Unregistered listener");

        if listeners.is_empty() {
            self.listeners.remove(&address);
            return true;
        }
        false
    }

    /// Forwards a raw log to every listener registered for its address.
    /// Logs removed by a reorg are dropped.
    pub fn dispatch(&self, raw_log: &RawLog) {
        if raw_log.removed {
            tracing::debug!(
                block_hash = %raw_log.block_hash,
                log_index = raw_log.log_index,
                "Ignoring log removed by a reorg"
            );
            return;
        }
        let Some(listeners) = self.listeners.get(&raw_log.address) else {
            return;
        };
        for listener in listeners.values() {
            let broadcast =
                LogBroadcast::new(raw_log.clone(), listener.job_identity(), self.store.clone());
            listener.handle_log(Ok(broadcast));
        }
    }

    pub fn notify_connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.for_each_listener(|listener| listener.on_connect());
    }

    pub fn notify_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.for_each_listener(|listener| listener.on_disconnect());
    }

    fn for_each_listener(&self, f: impl Fn(&Arc<dyn Listener>)) {
        self.listeners.values().flat_map(HashMap::values).for_each(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::DecodeError,
        events::{JobId, JobIdentity},
        storage::MemoryConsumedLogStore,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingListener {
        logs: Mutex<Vec<RawLog>>,
        connects: Mutex<usize>,
        disconnects: Mutex<usize>,
    }

    impl Listener for CountingListener {
        fn on_connect(&self) {
            *self.connects.lock().unwrap() += 1;
        }

        fn on_disconnect(&self) {
            *self.disconnects.lock().unwrap() += 1;
        }

        fn handle_log(&self, log: Result<LogBroadcast, DecodeError>) {
            self.logs.lock().unwrap().push(log.unwrap().raw_log().clone());
        }

        fn job_identity(&self) -> JobIdentity {
            JobIdentity::V1(JobId::new_random())
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(MemoryConsumedLogStore::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn log_for(address: Address) -> RawLog {
        RawLog {
            address,
            ..Default::default()
        }
    }

    #[test]
    fn only_new_addresses_need_resubscribe() {
        let mut dispatcher = dispatcher();
        let address = Address::repeat_byte(1);
        let first: Arc<dyn Listener> = Arc::new(CountingListener::default());
        let second: Arc<dyn Listener> = Arc::new(CountingListener::default());

        assert!(dispatcher.add_listener(address, first));
        assert!(!dispatcher.add_listener(address, second));
        assert_eq!(dispatcher.listener_count(&address), 2);
        assert_eq!(dispatcher.addresses(), vec![address]);
    }

    #[test]
    fn removing_last_listener_drops_address() {
        let mut dispatcher = dispatcher();
        let address = Address::repeat_byte(1);
        let first = Arc::new(CountingListener::default());
        let second = Arc::new(CountingListener::default());
        let first_dyn: Arc<dyn Listener> = first.clone();
        let second_dyn: Arc<dyn Listener> = second.clone();

        dispatcher.add_listener(address, first_dyn.clone());
        dispatcher.add_listener(address, second_dyn.clone());

        assert!(!dispatcher.remove_listener(address, &first_dyn));
        assert_eq!(*first.disconnects.lock().unwrap(), 1);
        assert!(dispatcher.remove_listener(address, &second_dyn));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn removing_from_unknown_address_is_harmless() {
        let mut dispatcher = dispatcher();
        let listener = Arc::new(CountingListener::default());
        let listener_dyn: Arc<dyn Listener> = listener.clone();

        assert!(!dispatcher.remove_listener(Address::repeat_byte(9), &listener_dyn));
        assert_eq!(*listener.disconnects.lock().unwrap(), 1);
    }

    #[test]
    #[should_panic(expected = "registration already exists")]
    fn duplicate_registration_panics() {
        let mut dispatcher = dispatcher();
        let listener: Arc<dyn Listener> = Arc::new(CountingListener::default());
        dispatcher.add_listener(Address::ZERO, listener.clone());
        dispatcher.add_listener(Address::ZERO, listener);
    }

    #[test]
    fn dispatch_routes_by_address_and_skips_removed() {
        let mut dispatcher = dispatcher();
        let a = Address::repeat_byte(0xa);
        let b = Address::repeat_byte(0xb);
        let on_a = Arc::new(CountingListener::default());
        let on_b = Arc::new(CountingListener::default());
        dispatcher.add_listener(a, on_a.clone());
        dispatcher.add_listener(b, on_b.clone());

        dispatcher.dispatch(&log_for(a));
        dispatcher.dispatch(&RawLog {
            removed: true,
            ..log_for(b)
        });
        dispatcher.dispatch(&log_for(Address::repeat_byte(0xc)));

        assert_eq!(on_a.logs.lock().unwrap().len(), 1);
        assert!(on_b.logs.lock().unwrap().is_empty());
    }

    #[test]
    fn connect_notifications_flip_the_flag() {
        let mut dispatcher = dispatcher();
        let listener = Arc::new(CountingListener::default());
        dispatcher.add_listener(Address::ZERO, listener.clone());

        dispatcher.notify_connect();
        assert!(dispatcher.is_connected());
        dispatcher.notify_disconnect();
        assert!(!dispatcher.is_connected());

        assert_eq!(*listener.connects.lock().unwrap(), 1);
        assert_eq!(*listener.disconnects.lock().unwrap(), 1);
    }
}
