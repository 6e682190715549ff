//! Broker driver and reconnection state machine.
//!
//! The [`BrokerDriver`] owns the broker connection, the channel catalog and
//! the handler catalog. When the connection fails it moves to
//! [`ConnectionState::Reconnecting`], retries with backoff until the broker
//! is reachable again, then recreates every channel and re-subscribes every
//! handler in registration order before reporting `Connected`.
//!
//! # Locking
//!
//! | Lock | Guards | Held across `.await` |
//! |------|--------|----------------------|
//! | `state` (watch) | lifecycle transitions | no |
//! | `connection` | current connection handle | no |
//! | `catalog` | channel/handler tables | no |
//! | `topology` | channel creation, subscription, replay | yes |
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use resilient_notifier::{BrokerDriver, ExchangeKind};
//!
//! let driver = BrokerDriver::builder().url("amqp://localhost:5672").build()?;
//! driver.connect().await?;
//! driver.create_channel("events", ExchangeKind::Fanout).await?;
//! driver.subscribe("events", Arc::new(|msg| println!("{msg}"))).await?;
//! driver.publish("events", &json!({"kind": "ping"})).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::codec;
use crate::error::{Error, Result};
use crate::transport::{
    DeliveryCallback, ExchangeKind, Transport, TransportChannel, TransportConnection,
};

use super::builder::DriverBuilder;
use super::catalog::{ChannelCatalog, MessageHandler};
use super::options::DriverOptions;
use super::state::ConnectionState;

// ============================================================================
// Constants
// ============================================================================

/// Routing key used for every publish and binding.
const ROUTING_KEY: &str = "";

/// Exchanges are transient; the broker forgets them on restart.
const DURABLE_EXCHANGES: bool = false;

// ============================================================================
// Types
// ============================================================================

/// What a connection error listener decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorOutcome {
    /// Error came from a connection that was already replaced.
    Stale,
    /// Driver was connected; a reconnect is now scheduled.
    Schedule,
    /// A connect loop is already running and will retry.
    InProgress,
    /// Driver was closed on request.
    Closing,
    /// Nothing to recover yet.
    Idle,
}

/// Internal shared state for the driver.
pub(crate) struct DriverInner {
    /// Transport used to open connections.
    transport: Arc<dyn Transport>,

    /// Endpoint and backoff.
    options: DriverOptions,

    /// Lifecycle state; the single source of truth for transitions.
    state: watch::Sender<ConnectionState>,

    /// Current connection, replaced on every reconnect.
    connection: Mutex<Option<Arc<dyn TransportConnection>>>,

    /// Channel and handler tables.
    catalog: Mutex<ChannelCatalog>,

    /// Serializes topology changes with recovery.
    topology: AsyncMutex<()>,

    /// Number of connections installed so far.
    generation: AtomicU64,

    /// Set when the connection being set up fails before `Connected`.
    setup_lost: AtomicBool,
}

// ============================================================================
// BrokerDriver
// ============================================================================

/// Self-healing broker driver.
///
/// Cheap to clone; clones share the same connection and catalogs.
///
/// Recovery tasks are spawned on the tokio runtime the connection was
/// established from, so [`connect`](Self::connect) must run inside tokio.
#[derive(Clone)]
pub struct BrokerDriver {
    /// Shared inner state.
    pub(crate) inner: Arc<DriverInner>,
}

// ============================================================================
// BrokerDriver - Display
// ============================================================================

impl fmt::Debug for BrokerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerDriver")
            .field("url", &self.inner.options.url)
            .field("state", &self.state())
            .field("channels", &self.channel_names())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BrokerDriver - Public API
// ============================================================================

impl BrokerDriver {
    /// Creates a configuration builder for the driver.
    #[inline]
    #[must_use]
    pub fn builder() -> DriverBuilder {
        DriverBuilder::new()
    }

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns a receiver that observes every state transition.
    #[inline]
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Returns the options the driver was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &DriverOptions {
        &self.inner.options
    }

    /// Returns how many connections have been installed.
    ///
    /// Grows by one with every successful (re)connect.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Returns the names of all created channels, sorted.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.inner.catalog.lock().channel_names()
    }

    /// Returns the number of handlers registered on `channel`.
    #[must_use]
    pub fn handler_count(&self, channel: &str) -> usize {
        self.inner.catalog.lock().handler_count(channel)
    }

    /// Connects to the broker, retrying until it succeeds.
    ///
    /// There is no retry limit: failed attempts are logged and retried after
    /// the configured backoff. If another caller is already connecting, this
    /// waits for that attempt instead of starting a second one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverClosed`] if the driver is closed before a
    /// connection is established.
    pub async fn connect(&self) -> Result<()> {
        if self
            .inner
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return self.inner.run_connect_loop().await;
        }

        self.inner.wait_until_connected().await
    }

    /// Creates a channel backed by an exchange named `name`.
    ///
    /// Creating an existing channel again replaces its transport channel and
    /// keeps its handlers.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the driver is not connected
    /// - [`Error::DriverClosed`] if the driver is closed
    /// - transport errors from channel creation or exchange declaration
    pub async fn create_channel(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        let _topology = self.inner.topology.lock().await;
        let connection = self.inner.live_connection()?;

        self.inner.open_channel(&connection, name, kind).await
    }

    /// Publishes `message` to every subscriber of `channel`.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelNotFound`] if `channel` was never created
    /// - [`Error::ChannelClosed`] if the channel died; recovery is started
    ///   before the error is returned
    pub async fn publish(&self, channel: &str, message: &Value) -> Result<()> {
        let target = self
            .inner
            .catalog
            .lock()
            .channel(channel)
            .ok_or_else(|| Error::channel_not_found(channel))?;

        let payload = codec::encode(message);
        debug!(
            channel,
            message = %codec::preview(&String::from_utf8_lossy(&payload)),
            "Publishing message"
        );

        match target.publish(channel, ROUTING_KEY, &payload).await {
            Ok(()) => Ok(()),
            Err(err @ Error::ChannelClosed { .. }) => {
                if self.inner.begin_recovery(Duration::ZERO) {
                    warn!(channel, "Publish hit a closed channel, reconnecting");
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Subscribes `handler` to `channel`.
    ///
    /// Declares a dedicated exclusive queue; every message is decoded and
    /// passed to the handler. The handler is remembered and re-subscribed
    /// after every reconnect.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelNotFound`] if `channel` was never created
    /// - [`Error::NotConnected`] if the driver is not connected
    pub async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()> {
        let _topology = self.inner.topology.lock().await;

        if !self.inner.catalog.lock().contains(channel) {
            return Err(Error::channel_not_found(channel));
        }
        self.inner.live_connection()?;

        self.inner.bind_handler(channel, Arc::clone(&handler)).await?;
        self.inner.catalog.lock().push_handler(channel, handler);

        Ok(())
    }

    /// Closes the connection and stops all reconnection.
    ///
    /// Channels and handlers are forgotten. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the connection fails to close cleanly.
    pub async fn close(&self) -> Result<()> {
        let previous = self.inner.state.send_replace(ConnectionState::Closed);
        if previous.is_terminal() {
            return Ok(());
        }

        self.inner.catalog.lock().clear();
        let connection = self.inner.connection.lock().take();

        if let Some(connection) = connection {
            connection.close().await?;
        }

        info!(previous = %previous, "Closed connection");
        Ok(())
    }
}

// ============================================================================
// BrokerDriver - Internal API
// ============================================================================

impl BrokerDriver {
    /// Creates a new driver instance.
    pub(crate) fn new(transport: Arc<dyn Transport>, options: DriverOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new(DriverInner {
            transport,
            options,
            state,
            connection: Mutex::new(None),
            catalog: Mutex::new(ChannelCatalog::default()),
            topology: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
            setup_lost: AtomicBool::new(false),
        });

        debug!(url = %inner.options.url, "Driver initialized");

        Self { inner }
    }
}

// ============================================================================
// DriverInner - State Machine
// ============================================================================

impl DriverInner {
    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Moves from `from` to `to` if the driver is in `from`.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from && from.can_transition_to(to) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Waits for a connect loop started elsewhere.
    async fn wait_until_connected(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
            .await
            .map_err(|_| Error::DriverClosed)?;

        match state {
            ConnectionState::Connected => Ok(()),
            _ => Err(Error::DriverClosed),
        }
    }

    /// Returns the connection if the driver is connected.
    fn live_connection(&self) -> Result<Arc<dyn TransportConnection>> {
        match self.current_state() {
            ConnectionState::Connected => {}
            ConnectionState::Closed => return Err(Error::DriverClosed),
            _ => return Err(Error::NotConnected),
        }

        self.connection.lock().clone().ok_or(Error::NotConnected)
    }

    /// Starts recovery if the driver is connected.
    ///
    /// Returns `false` when recovery is already running or the driver is
    /// not in a recoverable state.
    fn begin_recovery(self: &Arc<Self>, delay: Duration) -> bool {
        if !self.transition(ConnectionState::Connected, ConnectionState::Reconnecting) {
            return false;
        }

        self.spawn_connect_loop(&Handle::current(), delay);
        true
    }

    /// Spawns the connect loop after `delay`.
    fn spawn_connect_loop(self: &Arc<Self>, runtime: &Handle, delay: Duration) {
        let inner = Arc::clone(self);

        runtime.spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }

            if let Err(e) = inner.run_connect_loop().await {
                debug!(error = %e, "Reconnect loop stopped");
            }
        });
    }

    /// Reacts to an error reported by connection `generation`.
    fn handle_connection_error(self: &Arc<Self>, generation: u64, err: Error, runtime: &Handle) {
        let mut outcome = ErrorOutcome::Idle;

        self.state.send_if_modified(|state| {
            if generation != self.generation.load(Ordering::SeqCst) {
                outcome = ErrorOutcome::Stale;
                return false;
            }

            match *state {
                ConnectionState::Connected => {
                    *state = ConnectionState::Reconnecting;
                    outcome = ErrorOutcome::Schedule;
                    true
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    self.setup_lost.store(true, Ordering::SeqCst);
                    outcome = ErrorOutcome::InProgress;
                    false
                }
                ConnectionState::Closed => {
                    outcome = ErrorOutcome::Closing;
                    false
                }
                ConnectionState::Disconnected => false,
            }
        });

        match outcome {
            ErrorOutcome::Schedule => {
                let delay = self.options.reconnect.delay_for(0);
                error!(
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Connection lost, reconnecting"
                );
                self.spawn_connect_loop(runtime, delay);
            }
            ErrorOutcome::InProgress => {
                debug!(error = %err, "Connection error while a reconnect is in progress");
            }
            ErrorOutcome::Closing => debug!("Connection closed on request"),
            ErrorOutcome::Stale | ErrorOutcome::Idle => {
                trace!(generation, error = %err, "Ignoring connection error");
            }
        }
    }
}

// ============================================================================
// DriverInner - Connect Loop
// ============================================================================

impl DriverInner {
    /// Connects with unbounded retries, restoring topology when recovering.
    async fn run_connect_loop(self: &Arc<Self>) -> Result<()> {
        let url = self.options.url.as_str();
        let mut attempt: u32 = 0;

        loop {
            if self.current_state().is_terminal() {
                return Err(Error::DriverClosed);
            }

            match self.transport.connect(url).await {
                Ok(connection) => {
                    info!(url, "Connected to broker");

                    match self.install(connection).await {
                        Ok(()) => return Ok(()),
                        Err(Error::DriverClosed) => return Err(Error::DriverClosed),
                        Err(e) => warn!(error = %e, "Connection lost while restoring topology"),
                    }
                }
                Err(e) => error!(url, error = %e, "Failed to connect to broker"),
            }

            let delay = self.options.reconnect.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            sleep(delay).await;

            if self.current_state().is_terminal() {
                return Err(Error::DriverClosed);
            }
            info!(attempt, "Trying to reconnect...");
        }
    }

    /// Installs a fresh connection and, when recovering, rebuilds topology.
    async fn install(self: &Arc<Self>, connection: Arc<dyn TransportConnection>) -> Result<()> {
        let generation = self.next_generation();

        let weak = Arc::downgrade(self);
        let runtime = Handle::current();
        connection.on_error(Box::new(move |err| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_connection_error(generation, err, &runtime);
            }
        }));

        let previous = self.connection.lock().replace(Arc::clone(&connection));
        if let Some(previous) = previous {
            // Exclusive queues of the old link must go before replay binds new ones.
            Self::close_quietly(&previous).await;
        }

        let recovering = self.current_state() == ConnectionState::Reconnecting;
        if recovering {
            let _topology = self.topology.lock().await;
            if let Err(e) = self.restore_topology(&connection).await {
                self.discard(&connection).await;
                return Err(e);
            }
        }

        let mut closed = false;
        let mut lost = false;
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                closed = true;
                return false;
            }
            if self.setup_lost.swap(false, Ordering::SeqCst) {
                lost = true;
                return false;
            }
            if state.can_transition_to(ConnectionState::Connected) {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });

        if closed {
            self.discard(&connection).await;
            return Err(Error::DriverClosed);
        }

        if lost {
            self.discard(&connection).await;
            return Err(Error::connection("connection lost during setup"));
        }

        if recovering {
            info!(generation, "Reconnected successfully");
        }

        Ok(())
    }

    /// Removes `connection` from the slot if it is still installed, then closes it.
    async fn discard(&self, connection: &Arc<dyn TransportConnection>) {
        {
            let mut slot = self.connection.lock();
            if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, connection)) {
                slot.take();
            }
        }

        Self::close_quietly(connection).await;
    }

    async fn close_quietly(connection: &Arc<dyn TransportConnection>) {
        if let Err(e) = connection.close().await {
            debug!(error = %e, "Failed to close replaced connection");
        }
    }

    /// Starts a new connection generation.
    ///
    /// Runs under the state lock so a listener of the previous connection
    /// cannot mark the new one as lost.
    fn next_generation(&self) -> u64 {
        let mut generation = 0;
        self.state.send_if_modified(|_| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.setup_lost.store(false, Ordering::SeqCst);
            false
        });
        generation
    }
}

// ============================================================================
// DriverInner - Topology
// ============================================================================

impl DriverInner {
    /// Opens a transport channel for `name` and declares its exchange.
    async fn open_channel(
        &self,
        connection: &Arc<dyn TransportConnection>,
        name: &str,
        kind: ExchangeKind,
    ) -> Result<()> {
        let channel = connection.create_channel().await.inspect_err(|e| {
            error!(channel = name, error = %e, "Failed to create channel");
        })?;

        channel
            .declare_exchange(name, kind, DURABLE_EXCHANGES)
            .await?;

        {
            // `close()` sets the terminal state before clearing the catalog.
            let mut catalog = self.catalog.lock();
            if self.current_state().is_terminal() {
                return Err(Error::DriverClosed);
            }
            catalog.insert_channel(name, channel, kind);
        }
        info!(channel = name, kind = %kind, "Created channel");

        Ok(())
    }

    /// Binds `handler` to a new queue on `channel` without recording it.
    async fn bind_handler(&self, channel: &str, handler: MessageHandler) -> Result<()> {
        let target: Arc<dyn TransportChannel> = self
            .catalog
            .lock()
            .channel(channel)
            .ok_or_else(|| Error::channel_not_found(channel))?;

        let label = channel.to_owned();
        let on_delivery: DeliveryCallback = Arc::new(move |body: Vec<u8>| {
            trace!(channel = %label, bytes = body.len(), "Received message");
            let message = codec::decode(&body);
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                error!(channel = %label, "Message handler panicked");
            }
        });

        let queue = target.consume(channel, ROUTING_KEY, on_delivery).await?;
        debug!(channel, queue = %queue, "Handler subscribed");

        Ok(())
    }

    /// Recreates channels, then replays handlers onto them.
    async fn restore_topology(&self, connection: &Arc<dyn TransportConnection>) -> Result<()> {
        self.recreate_channels(connection).await?;
        self.replay_handlers().await
    }

    /// Recreates every known channel on `connection`.
    async fn recreate_channels(&self, connection: &Arc<dyn TransportConnection>) -> Result<()> {
        let plan = self.catalog.lock().recreation_plan();
        info!(channels = plan.len(), "Recreating channels...");

        for (name, kind) in plan {
            self.open_channel(connection, &name, kind).await?;
        }

        info!("Recreating channels completed");
        Ok(())
    }

    /// Re-subscribes every handler in registration order.
    async fn replay_handlers(&self) -> Result<()> {
        let plan = self.catalog.lock().replay_plan();
        info!("Reassigning handlers...");

        for (channel, handlers) in plan {
            info!(channel = %channel, handlers = handlers.len(), "Re-subscribing handlers");
            for handler in handlers {
                self.bind_handler(&channel, handler).await?;
            }
        }

        info!("Reassigning handlers completed");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
