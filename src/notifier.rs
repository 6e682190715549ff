//! Application-facing notifier.
//!
//! A [`Notifier`] publishes to and receives from the single
//! [`NOTIFICATIONS_CHANNEL`]. Startup and sending are best effort: failures
//! are logged and handed back as a [`Result`] the caller may ignore.
//! Registering a receiver is not: its error is returned unlogged, because a
//! caller that cannot subscribe has to act on it.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//!
//! let notifier = resilient_notifier::notifier_factory()?;
//! let _ = notifier.init().await;
//!
//! notifier.receive(|message| println!("received {message}")).await?;
//! let _ = notifier.notify(&json!({"event": "signup"})).await;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::driver::BrokerDriver;
use crate::error::Result;
use crate::pubsub::{PubSub, PubSubDriver};

// ============================================================================
// Constants
// ============================================================================

/// Channel every notifier publishes to and receives from.
pub const NOTIFICATIONS_CHANNEL: &str = "notifications";

// ============================================================================
// Notifier
// ============================================================================

/// Notification sender/receiver bound to [`NOTIFICATIONS_CHANNEL`].
#[derive(Debug, Clone)]
pub struct Notifier<D = BrokerDriver> {
    pubsub: PubSub<D>,
}

impl<D: PubSubDriver> Notifier<D> {
    /// Creates a notifier on top of `pubsub`.
    #[inline]
    #[must_use]
    pub fn new(pubsub: PubSub<D>) -> Self {
        Self { pubsub }
    }

    /// Returns the channel name this notifier uses.
    #[inline]
    #[must_use]
    pub const fn channel(&self) -> &'static str {
        NOTIFICATIONS_CHANNEL
    }

    /// Returns the underlying facade.
    #[inline]
    #[must_use]
    pub fn pubsub(&self) -> &PubSub<D> {
        &self.pubsub
    }

    /// Connects and creates the notifications channel.
    ///
    /// Failures are logged; a notifier whose `init` failed stays inert.
    ///
    /// # Errors
    ///
    /// Returns the connect or channel creation error after logging it.
    pub async fn init(&self) -> Result<()> {
        let result = async {
            self.pubsub.connect().await?;
            self.pubsub.create_channel(NOTIFICATIONS_CHANNEL).await
        }
        .await;

        if let Err(ref e) = result {
            error!(error = %e, "Notifier initialization failed");
        }
        result
    }

    /// Publishes `message` to the notifications channel.
    ///
    /// Strings are sent verbatim, other values as JSON.
    ///
    /// # Errors
    ///
    /// Returns the serialization or publish error after logging it.
    pub async fn notify<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let result = async {
            let value = serde_json::to_value(message)?;
            self.pubsub.publish(NOTIFICATIONS_CHANNEL, &value).await
        }
        .await;

        if let Err(ref e) = result {
            error!(error = %e, "Failed to notify");
        }
        result
    }

    /// Registers `handler` for every notification.
    ///
    /// # Errors
    ///
    /// Returns the subscribe error unchanged.
    pub async fn receive<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.pubsub
            .subscribe(NOTIFICATIONS_CHANNEL, Arc::new(handler))
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use crate::error::Error;
    use crate::transport::{ExchangeKind, MemoryBroker, Transport};

    fn memory_notifier(broker: &Arc<MemoryBroker>) -> Notifier {
        let driver = BrokerDriver::builder()
            .transport(broker.transport())
            .build()
            .unwrap();
        Notifier::new(PubSub::new(driver))
    }

    #[tokio::test]
    async fn test_init_creates_notifications_channel() {
        let broker = MemoryBroker::new();
        let notifier = memory_notifier(&broker);

        assert_ok!(notifier.init().await);
        assert_eq!(broker.exchange_names(), vec![NOTIFICATIONS_CHANNEL.to_string()]);
    }

    #[tokio::test]
    async fn test_failed_init_leaves_notifier_inert() {
        let broker = MemoryBroker::new();
        let other = broker.transport().connect("amqp://memory").await.unwrap();
        other
            .create_channel()
            .await
            .unwrap()
            .declare_exchange(NOTIFICATIONS_CHANNEL, ExchangeKind::Direct, false)
            .await
            .unwrap();

        let notifier = memory_notifier(&broker);

        let err = assert_err!(notifier.init().await);
        assert!(matches!(err, Error::Transport { .. }));

        let err = assert_err!(notifier.notify(&json!({"a": 1})).await);
        assert!(matches!(err, Error::ChannelNotFound { .. }));
        assert_err!(notifier.receive(|_| {}).await);
    }

    #[tokio::test]
    async fn test_notify_without_channel_is_contained() {
        let notifier = memory_notifier(&MemoryBroker::new());

        let err = assert_err!(notifier.notify(&json!({"a": 1})).await);
        assert!(matches!(err, Error::ChannelNotFound { .. }));
    }

    #[tokio::test]
    async fn test_receive_propagates_failure() {
        let notifier = memory_notifier(&MemoryBroker::new());

        let err = assert_err!(notifier.receive(|_| {}).await);
        assert!(matches!(err, Error::ChannelNotFound { .. }));
    }

    #[tokio::test]
    async fn test_notify_reaches_receiver() {
        let broker = MemoryBroker::new();
        let notifier = memory_notifier(&broker);
        notifier.init().await.unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        notifier.receive(move |msg| sink.lock().push(msg)).await.unwrap();

        notifier.notify(&json!({"a": 1})).await.unwrap();
        notifier.notify("hello").await.unwrap();

        assert_eq!(received.lock().clone(), vec![json!({"a": 1}), json!("hello")]);
    }

    #[test]
    fn test_channel_is_fixed() {
        let notifier = memory_notifier(&MemoryBroker::new());
        assert_eq!(notifier.channel(), "notifications");
    }
}
