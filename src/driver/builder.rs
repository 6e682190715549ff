//! Builder pattern for driver configuration.
//!
//! Provides a fluent API for configuring and creating [`BrokerDriver`]
//! instances.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use resilient_notifier::{BrokerDriver, MemoryBroker, ReconnectPolicy};
//!
//! let broker = MemoryBroker::new();
//! let driver = BrokerDriver::builder()
//!     .url("amqp://localhost:5672")
//!     .reconnect(ReconnectPolicy::fixed(Duration::from_secs(1)))
//!     .transport(broker.transport())
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
#[cfg(not(feature = "amqp"))]
use crate::error::Error;
use crate::transport::Transport;

use super::core::BrokerDriver;
use super::options::{DriverOptions, ReconnectPolicy};

// ============================================================================
// DriverBuilder
// ============================================================================

/// Builder for configuring a [`BrokerDriver`] instance.
///
/// Use [`BrokerDriver::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct DriverBuilder {
    /// Connection options.
    options: DriverOptions,
    /// Transport used to reach the broker.
    transport: Option<Arc<dyn Transport>>,
}

impl fmt::Debug for DriverBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverBuilder")
            .field("options", &self.options)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

// ============================================================================
// DriverBuilder Implementation
// ============================================================================

impl DriverBuilder {
    /// Creates a new driver builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the broker URL.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.options.url = url.into();
        self
    }

    /// Replaces all connection options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the reconnect backoff policy.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.options.reconnect = policy;
        self
    }

    /// Sets the transport used to reach the broker.
    ///
    /// Defaults to [`AmqpTransport`](crate::transport::AmqpTransport) when
    /// the `amqp` feature is enabled.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Builds the driver with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the URL is invalid
    /// - [`Error::Config`](crate::Error::Config) if no transport is set and
    ///   the `amqp` feature is disabled
    pub fn build(self) -> Result<BrokerDriver> {
        self.options.validate()?;
        let transport = self.resolve_transport()?;

        Ok(BrokerDriver::new(transport, self.options))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl DriverBuilder {
    #[cfg(feature = "amqp")]
    fn resolve_transport(&self) -> Result<Arc<dyn Transport>> {
        Ok(self
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(crate::transport::AmqpTransport::new())))
    }

    #[cfg(not(feature = "amqp"))]
    fn resolve_transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport.clone().ok_or_else(|| {
            Error::config(
                "Transport is required. Use .transport() to set it.\n\
                 Example: BrokerDriver::builder().transport(broker.transport())",
            )
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
