//! Broker driver module.
//!
//! This module owns the broker connection and keeps subscriptions alive
//! across connection loss.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BrokerDriver`] | Connection owner, channel/handler catalog, recovery |
//! | [`DriverBuilder`] | Fluent configuration builder |
//! | [`DriverOptions`] | Broker URL and reconnect policy |
//! | [`ReconnectPolicy`] | Delay schedule between connection attempts |
//! | [`ConnectionState`] | Lifecycle state machine |
//!
//! # Example
//!
//! ```ignore
//! use resilient_notifier::{BrokerDriver, ExchangeKind};
//!
//! let driver = BrokerDriver::builder()
//!     .url("amqp://localhost:5672")
//!     .build()?;
//!
//! driver.connect().await?;
//! driver.create_channel("events", ExchangeKind::Fanout).await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for driver configuration.
pub mod builder;

/// Channel and handler catalog.
mod catalog;

/// Core driver implementation.
pub mod core;

/// Connection options and backoff policy.
pub mod options;

/// Connection state machine.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::DriverBuilder;
pub use catalog::MessageHandler;
pub use self::core::BrokerDriver;
pub use options::{DriverOptions, ReconnectPolicy};
pub use state::ConnectionState;
