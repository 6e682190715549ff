//! Publish/subscribe facade.
//!
//! [`PubSub`] exposes the four pub/sub operations and forwards them to a
//! [`PubSubDriver`]. Code written against the facade does not depend on a
//! particular driver.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::driver::{BrokerDriver, MessageHandler};
use crate::error::Result;
use crate::transport::ExchangeKind;

// ============================================================================
// PubSubDriver
// ============================================================================

/// Capability set a pub/sub driver provides.
#[async_trait]
pub trait PubSubDriver: Send + Sync {
    /// Connects to the broker.
    async fn connect(&self) -> Result<()>;

    /// Creates a named channel.
    async fn create_channel(&self, name: &str, kind: ExchangeKind) -> Result<()>;

    /// Publishes a message to a channel.
    async fn publish(&self, channel: &str, message: &Value) -> Result<()>;

    /// Subscribes a handler to a channel.
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()>;
}

#[async_trait]
impl PubSubDriver for BrokerDriver {
    async fn connect(&self) -> Result<()> {
        BrokerDriver::connect(self).await
    }

    async fn create_channel(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        BrokerDriver::create_channel(self, name, kind).await
    }

    async fn publish(&self, channel: &str, message: &Value) -> Result<()> {
        BrokerDriver::publish(self, channel, message).await
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()> {
        BrokerDriver::subscribe(self, channel, handler).await
    }
}

// ============================================================================
// PubSub
// ============================================================================

/// Delegating pub/sub facade over a driver.
#[derive(Debug, Clone)]
pub struct PubSub<D = BrokerDriver> {
    driver: D,
}

impl<D: PubSubDriver> PubSub<D> {
    /// Wraps `driver`.
    #[inline]
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    /// Returns the wrapped driver.
    #[inline]
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// See [`PubSubDriver::connect`].
    pub async fn connect(&self) -> Result<()> {
        self.driver.connect().await
    }

    /// Creates a fanout channel.
    pub async fn create_channel(&self, name: &str) -> Result<()> {
        self.driver.create_channel(name, ExchangeKind::default()).await
    }

    /// Creates a channel with an explicit exchange kind.
    pub async fn create_channel_with_kind(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        self.driver.create_channel(name, kind).await
    }

    /// See [`PubSubDriver::publish`].
    pub async fn publish(&self, channel: &str, message: &Value) -> Result<()> {
        self.driver.publish(channel, message).await
    }

    /// See [`PubSubDriver::subscribe`].
    pub async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()> {
        self.driver.subscribe(channel, handler).await
    }
}

// ============================================================================
// Tests
// ============================================================================
