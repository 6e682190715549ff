//! In-process message broker.
//!
//! [`MemoryBroker`] keeps exchanges, queue bindings and connections in
//! memory and delivers messages synchronously. It behaves like a
//! non-durable AMQP broker: exclusive queues disappear with the connection
//! that declared them, and a [`restart`](MemoryBroker::restart) forgets all
//! exchanges.
//!
//! Fault injection hooks let tests and demos exercise recovery without a
//! real broker:
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`set_reachable`](MemoryBroker::set_reachable) | refuse or accept new connections |
//! | [`drop_connections`](MemoryBroker::drop_connections) | kill every live connection |
//! | [`sever_connections`](MemoryBroker::sever_connections) | kill connections silently |
//! | [`close_channels`](MemoryBroker::close_channels) | close open channels, keep connections |
//! | [`restart`](MemoryBroker::restart) | kill connections and forget exchanges |
//! | [`emit_error`](MemoryBroker::emit_error) | notify listeners without killing |
//!
//! # Example
//!
//! ```ignore
//! let broker = MemoryBroker::new();
//! let driver = BrokerDriver::builder()
//!     .transport(broker.transport())
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::{
    ConnectionListener, DeliveryCallback, ExchangeKind, Transport, TransportChannel,
    TransportConnection,
};

// ============================================================================
// Types
// ============================================================================

/// Shared form of a registered [`ConnectionListener`].
type SharedListener = Arc<dyn Fn(Error) + Send + Sync>;

/// A queue bound to an exchange, owned by the connection that declared it.
struct Binding {
    queue: String,
    routing_key: String,
    connection_id: u64,
    on_delivery: DeliveryCallback,
}

/// Exchange declared on the broker.
struct MemoryExchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

/// Mutable broker state.
struct BrokerState {
    reachable: bool,
    connect_attempts: usize,
    /// Channels opened before the current epoch are closed.
    channel_epoch: u64,
    exchanges: FxHashMap<String, MemoryExchange>,
    /// Live connections and their listeners.
    connections: FxHashMap<u64, Vec<SharedListener>>,
}

// ============================================================================
// MemoryBroker
// ============================================================================

/// In-memory broker shared by every [`MemoryTransport`] created from it.
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
}

impl MemoryBroker {
    /// Creates an empty, reachable broker.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState {
                reachable: true,
                connect_attempts: 0,
                channel_epoch: 0,
                exchanges: FxHashMap::default(),
                connections: FxHashMap::default(),
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Returns a transport that connects to this broker.
    #[must_use]
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            broker: Arc::clone(self),
        }
    }

    /// Accepts (`true`) or refuses (`false`) new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Returns the number of connection attempts seen, including refused ones.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Returns the declared exchange names, sorted.
    #[must_use]
    pub fn exchange_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().exchanges.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the kind an exchange was declared with.
    #[must_use]
    pub fn exchange_kind(&self, exchange: &str) -> Option<ExchangeKind> {
        self.state.lock().exchanges.get(exchange).map(|e| e.kind)
    }

    /// Returns the number of queues bound to `exchange`.
    #[must_use]
    pub fn queue_count(&self, exchange: &str) -> usize {
        self.state
            .lock()
            .exchanges
            .get(exchange)
            .map_or(0, |e| e.bindings.len())
    }

    /// Kills every live connection and notifies their listeners.
    ///
    /// Exclusive queues owned by those connections are deleted.
    pub fn drop_connections(&self, reason: &str) {
        let listeners: Vec<SharedListener> = {
            let mut state = self.state.lock();
            let ids: Vec<u64> = state.connections.keys().copied().collect();
            let mut listeners = Vec::new();
            for id in ids {
                if let Some(mut registered) = Self::remove_connection(&mut state, id) {
                    listeners.append(&mut registered);
                }
            }
            listeners
        };

        debug!(reason, listeners = listeners.len(), "Dropping all connections");

        for listener in listeners {
            listener(Error::connection(reason));
        }
    }

    /// Kills every live connection without notifying anyone.
    ///
    /// Models a half-open link that is only noticed on the next use.
    pub fn sever_connections(&self) {
        let mut state = self.state.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            Self::remove_connection(&mut state, id);
        }
    }

    /// Closes every open channel while leaving connections and queues alive.
    ///
    /// Models a channel-level close: the link stays up, later channel
    /// operations fail with [`Error::ChannelClosed`].
    pub fn close_channels(&self) {
        self.state.lock().channel_epoch += 1;
    }

    /// Simulates a broker restart: drops connections and forgets exchanges.
    pub fn restart(&self) {
        self.drop_connections("broker restarted");
        self.state.lock().exchanges.clear();
    }

    /// Notifies every connection listener of an error without closing anything.
    pub fn emit_error(&self, reason: &str) {
        let listeners: Vec<SharedListener> = self
            .state
            .lock()
            .connections
            .values()
            .flatten()
            .cloned()
            .collect();

        for listener in listeners {
            listener(Error::connection(reason));
        }
    }

    /// Removes a connection and its queues, returning its listeners.
    fn remove_connection(state: &mut BrokerState, id: u64) -> Option<Vec<SharedListener>> {
        let listeners = state.connections.remove(&id)?;
        for exchange in state.exchanges.values_mut() {
            exchange.bindings.retain(|b| b.connection_id != id);
        }
        Some(listeners)
    }

}

// ============================================================================
// MemoryTransport
// ============================================================================

/// [`Transport`] implementation connecting to a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
}

impl MemoryTransport {
    /// Returns the broker this transport connects to.
    #[inline]
    #[must_use]
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn TransportConnection>> {
        let mut state = self.broker.state.lock();
        state.connect_attempts += 1;

        if !state.reachable {
            return Err(Error::connection(format!("{url}: connection refused")));
        }

        let id = self.broker.next_id.fetch_add(1, Ordering::Relaxed);
        state.connections.insert(id, Vec::new());
        trace!(id, url, "Memory connection opened");

        Ok(Arc::new(MemoryConnection {
            id,
            broker: Arc::clone(&self.broker),
        }))
    }
}

// ============================================================================
// MemoryConnection
// ============================================================================

struct MemoryConnection {
    id: u64,
    broker: Arc<MemoryBroker>,
}

#[async_trait]
impl TransportConnection for MemoryConnection {
    fn on_error(&self, listener: ConnectionListener) {
        if let Some(listeners) = self.broker.state.lock().connections.get_mut(&self.id) {
            listeners.push(Arc::from(listener));
        }
    }

    async fn create_channel(&self) -> Result<Arc<dyn TransportChannel>> {
        let state = self.broker.state.lock();
        if !state.connections.contains_key(&self.id) {
            return Err(Error::connection("connection is closed"));
        }

        Ok(Arc::new(MemoryChannel {
            connection_id: self.id,
            epoch: state.channel_epoch,
            broker: Arc::clone(&self.broker),
        }))
    }

    async fn close(&self) -> Result<()> {
        let listeners = {
            let mut state = self.broker.state.lock();
            MemoryBroker::remove_connection(&mut state, self.id)
        };

        // A closed AMQP connection reports the closure to its listeners.
        for listener in listeners.into_iter().flatten() {
            listener(Error::connection("Connection closing"));
        }

        Ok(())
    }
}

// ============================================================================
// MemoryChannel
// ============================================================================

struct MemoryChannel {
    connection_id: u64,
    epoch: u64,
    broker: Arc<MemoryBroker>,
}

impl MemoryChannel {
    fn is_open(&self, state: &BrokerState) -> bool {
        self.epoch == state.channel_epoch && state.connections.contains_key(&self.connection_id)
    }
}

#[async_trait]
impl TransportChannel for MemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, _durable: bool) -> Result<()> {
        let mut state = self.broker.state.lock();

        if !self.is_open(&state) {
            return Err(Error::channel_closed(name));
        }

        let exchange = state
            .exchanges
            .entry(name.to_owned())
            .or_insert_with(|| MemoryExchange {
                kind,
                bindings: Vec::new(),
            });

        if exchange.kind != kind {
            return Err(Error::transport(format!(
                "PRECONDITION_FAILED - exchange '{name}' declared as {}, requested {kind}",
                exchange.kind
            )));
        }

        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let targets: Vec<DeliveryCallback> = {
            let state = self.broker.state.lock();

            if !self.is_open(&state) {
                return Err(Error::channel_closed(exchange));
            }

            let target = state.exchanges.get(exchange).ok_or_else(|| {
                Error::transport(format!("NOT_FOUND - no exchange '{exchange}'"))
            })?;

            target
                .bindings
                .iter()
                .filter(|b| target.kind == ExchangeKind::Fanout || b.routing_key == routing_key)
                .map(|b| Arc::clone(&b.on_delivery))
                .collect()
        };

        for on_delivery in targets {
            on_delivery(payload.to_vec());
        }

        Ok(())
    }

    async fn consume(
        &self,
        exchange: &str,
        routing_key: &str,
        on_delivery: DeliveryCallback,
    ) -> Result<String> {
        let queue = format!("amq.gen-{}", self.broker.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.broker.state.lock();

        if !self.is_open(&state) {
            return Err(Error::channel_closed(exchange));
        }

        let target = state.exchanges.get_mut(exchange).ok_or_else(|| {
            Error::transport(format!("NOT_FOUND - no exchange '{exchange}'"))
        })?;

        target.bindings.push(Binding {
            queue: queue.clone(),
            routing_key: routing_key.to_owned(),
            connection_id: self.connection_id,
            on_delivery,
        });

        trace!(exchange, queue = %queue, "Memory queue bound");
        Ok(queue)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> DeliveryCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_refused_connection_counts_attempt() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);

        let result = broker.transport().connect("amqp://memory").await;
        assert!(matches!(result, Err(Error::Connection { .. })));
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(broker.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_every_queue() {
        let broker = MemoryBroker::new();
        let connection = broker.transport().connect("amqp://memory").await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        channel
            .declare_exchange("events", ExchangeKind::Fanout, false)
            .await
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        channel.consume("events", "", counting_callback(&counter)).await.unwrap();
        channel.consume("events", "", counting_callback(&counter)).await.unwrap();

        channel.publish("events", "", b"hi").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(broker.queue_count("events"), 2);
    }

    #[tokio::test]
    async fn test_direct_routes_by_key() {
        let broker = MemoryBroker::new();
        let connection = broker.transport().connect("amqp://memory").await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        channel
            .declare_exchange("jobs", ExchangeKind::Direct, false)
            .await
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        channel.consume("jobs", "a", counting_callback(&counter)).await.unwrap();

        channel.publish("jobs", "b", b"x").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        channel.publish("jobs", "a", b"x").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_redeclare_with_other_kind_fails() {
        let broker = MemoryBroker::new();
        let connection = broker.transport().connect("amqp://memory").await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        channel
            .declare_exchange("x", ExchangeKind::Fanout, false)
            .await
            .unwrap();

        let result = channel.declare_exchange("x", ExchangeKind::Direct, false).await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn test_drop_connections_removes_queues_and_notifies() {
        let broker = MemoryBroker::new();
        let connection = broker.transport().connect("amqp://memory").await.unwrap();
        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = Arc::clone(&notified);
        connection.on_error(Box::new(move |_| {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let channel = connection.create_channel().await.unwrap();
        channel
            .declare_exchange("events", ExchangeKind::Fanout, false)
            .await
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        channel.consume("events", "", counting_callback(&counter)).await.unwrap();

        broker.drop_connections("test");

        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(broker.queue_count("events"), 0);
        assert_eq!(broker.exchange_names(), vec!["events".to_string()]);

        let result = channel.publish("events", "", b"x").await;
        assert!(matches!(result, Err(Error::ChannelClosed { .. })));
    }

    #[tokio::test]
    async fn test_close_channels_keeps_connection_and_queues() {
        let broker = MemoryBroker::new();
        let connection = broker.transport().connect("amqp://memory").await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        channel
            .declare_exchange("events", ExchangeKind::Fanout, false)
            .await
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        channel.consume("events", "", counting_callback(&counter)).await.unwrap();

        broker.close_channels();

        let result = channel.publish("events", "", b"x").await;
        assert!(matches!(result, Err(Error::ChannelClosed { .. })));
        assert_eq!(broker.live_connections(), 1);
        assert_eq!(broker.queue_count("events"), 1);

        let fresh = connection.create_channel().await.unwrap();
        fresh.publish("events", "", b"x").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_forgets_exchanges() {
        let broker = MemoryBroker::new();
        let connection = broker.transport().connect("amqp://memory").await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        channel
            .declare_exchange("events", ExchangeKind::Fanout, false)
            .await
            .unwrap();

        broker.restart();

        assert!(broker.exchange_names().is_empty());
        assert_eq!(broker.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_close_reports_closing() {
        let broker = MemoryBroker::new();
        let connection = broker.transport().connect("amqp://memory").await.unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let messages_clone = Arc::clone(&messages);
        connection.on_error(Box::new(move |e| messages_clone.lock().push(e.to_string())));

        connection.close().await.unwrap();

        assert_eq!(
            messages.lock().as_slice(),
            ["Connection failed: Connection closing".to_string()]
        );
        assert!(connection.create_channel().await.is_err());
    }
}
