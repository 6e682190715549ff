//! Broker transport layer.
//!
//! This module defines the capability the driver needs from a message
//! broker client and provides its implementations. Driver code depends on
//! the traits only; broker-specific types never leak past this module.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  BrokerDriver   │       TransportConnection    │  Broker         │
//! │                 │◄────────────────────────────►│                 │
//! │  channel table  │   TransportChannel per name  │  exchange/name  │
//! │  handler table  │                              │  queue/consumer │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `amqp` | AMQP 0.9.1 transport backed by `lapin` (feature `amqp`) |
//! | `memory` | In-process broker with fault injection |

// ============================================================================
// Submodules
// ============================================================================

/// AMQP transport backed by lapin.
#[cfg(feature = "amqp")]
pub mod amqp;

/// In-process broker for tests and offline demos.
pub mod memory;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

// ============================================================================
// Re-exports
// ============================================================================

#[cfg(feature = "amqp")]
pub use amqp::AmqpTransport;
pub use memory::{MemoryBroker, MemoryTransport};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked with the raw body of every delivered message.
pub type DeliveryCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Listener invoked when a connection fails or closes.
///
/// May be called from a thread owned by the transport, more than once.
pub type ConnectionListener = Box<dyn Fn(Error) + Send + Sync>;

// ============================================================================
// ExchangeKind
// ============================================================================

/// Routing topology of the exchange backing a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Every bound queue receives every message.
    #[default]
    Fanout,
    /// Messages are routed by exact routing key.
    Direct,
}

impl ExchangeKind {
    /// Returns the AMQP exchange type name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fanout => "fanout",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Factory for broker connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a new connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the broker is unreachable.
    async fn connect(&self, url: &str) -> Result<Arc<dyn TransportConnection>>;
}

/// A single live link to the broker.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Registers the listener called on connection errors or closure.
    fn on_error(&self, listener: ConnectionListener);

    /// Opens a new channel on this connection.
    async fn create_channel(&self) -> Result<Arc<dyn TransportChannel>>;

    /// Closes the connection.
    async fn close(&self) -> Result<()>;
}

/// A channel opened on a [`TransportConnection`].
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Declares an exchange on the broker.
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()>;

    /// Publishes `payload` to `exchange` and waits for the broker to accept it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the channel is no longer usable.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Declares an exclusive queue, binds it to `exchange` and starts
    /// consuming with automatic acknowledgement.
    ///
    /// Returns the broker-assigned queue name.
    async fn consume(
        &self,
        exchange: &str,
        routing_key: &str,
        on_delivery: DeliveryCallback,
    ) -> Result<String>;
}
