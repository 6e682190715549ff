//! Resilient notifier - self-healing publish/subscribe over an AMQP broker.
//!
//! This library lets application code publish notifications and register
//! handlers without caring about connection drops or broker restarts. The
//! driver detects a lost connection, reconnects with backoff, recreates
//! every channel and re-subscribes every handler in its original order.
//!
//! # Architecture
//!
//! ```text
//! Notifier ──► PubSub ──► BrokerDriver ──► Transport ──► broker
//!    ▲                        │
//!    └──── handler(Value) ◄───┘ (codec::parse)
//! ```
//!
//! Key design principles:
//!
//! - One exchange per channel name, one exclusive auto-ack queue per handler
//! - The driver owns the connection and all topology bookkeeping
//! - Connection state is an explicit state machine; `close()` is terminal
//! - Retries never give up; topology changes and replay never interleave
//!
//! # Quick Start
//!
//! ```no_run
//! use resilient_notifier::{Result, notifier_factory};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let notifier = notifier_factory()?;
//!     notifier.init().await?;
//!
//!     notifier.receive(|message| println!("received {message}")).await?;
//!     notifier.notify(&json!({"event": "signup", "user": 42})).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`codec`] | Payload formatting and tolerant parsing |
//! | [`driver`] | Broker driver, options and state machine |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`notifier`] | Application-facing notifier |
//! | [`pubsub`] | Driver-agnostic pub/sub facade |
//! | [`transport`] | Broker transports (AMQP, in-memory) |
//!
//! # Features
//!
//! - `amqp` (default): [`AmqpTransport`](transport::AmqpTransport) on `lapin`
//!   and [`notifier_factory`]

// ============================================================================
// Modules
// ============================================================================

/// Message codec.
pub mod codec;

/// Broker driver and configuration.
///
/// Use [`BrokerDriver::builder()`] to create a configured driver instance.
pub mod driver;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Notifier composition helpers.
mod factory;

/// Notification API bound to a single channel.
pub mod notifier;

/// Publish/subscribe facade.
pub mod pubsub;

/// Broker transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Driver types
pub use driver::{
    BrokerDriver, ConnectionState, DriverBuilder, DriverOptions, MessageHandler, ReconnectPolicy,
};

// Error types
pub use error::{Error, Result};

// Composition
#[cfg(feature = "amqp")]
pub use factory::notifier_factory;
pub use factory::notifier_with;

// Notifier types
pub use notifier::{NOTIFICATIONS_CHANNEL, Notifier};
pub use pubsub::{PubSub, PubSubDriver};

// Transport types
#[cfg(feature = "amqp")]
pub use transport::AmqpTransport;
pub use transport::{ExchangeKind, MemoryBroker, MemoryTransport, Transport};
