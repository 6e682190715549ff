//! Notifier wiring.
//!
//! Composes options, transport, driver, facade and notifier. No logic
//! beyond construction lives here.

// ============================================================================
// Imports
// ============================================================================

use crate::driver::{BrokerDriver, DriverOptions};
use crate::error::Result;
use crate::notifier::Notifier;
use crate::pubsub::PubSub;
use crate::transport::Transport;

// ============================================================================
// Factories
// ============================================================================

/// Builds a notifier on the AMQP transport, configured from the environment.
///
/// # Errors
///
/// Returns [`Error::Config`](crate::Error::Config) if the environment holds
/// invalid values.
#[cfg(feature = "amqp")]
pub fn notifier_factory() -> Result<Notifier> {
    notifier_with(crate::transport::AmqpTransport::new(), DriverOptions::from_env()?)
}

/// Builds a notifier on an arbitrary transport.
///
/// # Errors
///
/// Returns [`Error::Config`](crate::Error::Config) if `options` are invalid.
pub fn notifier_with(transport: impl Transport, options: DriverOptions) -> Result<Notifier> {
    let driver = BrokerDriver::builder()
        .options(options)
        .transport(transport)
        .build()?;

    Ok(Notifier::new(PubSub::new(driver)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::driver::ConnectionState;
    use crate::transport::MemoryBroker;

    #[test]
    fn test_notifier_with_memory_transport() {
        let broker = MemoryBroker::new();
        let notifier = notifier_with(broker.transport(), DriverOptions::default()).unwrap();

        assert_eq!(notifier.pubsub().driver().state(), ConnectionState::Disconnected);
        assert_eq!(broker.connect_attempts(), 0);
    }

    #[test]
    fn test_notifier_with_invalid_options() {
        let result = notifier_with(
            MemoryBroker::new().transport(),
            DriverOptions::new("redis://localhost"),
        );
        assert!(result.is_err());
    }
}
