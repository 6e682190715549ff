//! AMQP 0.9.1 transport backed by `lapin`.
//!
//! Maps the transport traits onto lapin connections and channels:
//!
//! - channels run in publisher-confirm mode; a broker nack fails the publish
//! - exchanges are declared with the requested kind and durability
//! - every `consume` declares a server-named exclusive queue, binds it and
//!   spawns a tokio task draining the consumer stream (auto-ack)
//! - closed-channel and closed-connection states are reported as
//!   [`Error::ChannelClosed`] so the driver can start recovery

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::{
    ConnectionListener, DeliveryCallback, ExchangeKind, Transport, TransportChannel,
    TransportConnection,
};

// ============================================================================
// Constants
// ============================================================================

/// Reply code sent with a graceful connection close.
const REPLY_SUCCESS: u16 = 200;

/// Reply text sent with a graceful connection close.
const CLOSE_REASON: &str = "Connection closing";

// ============================================================================
// Error Mapping
// ============================================================================

/// Maps a lapin error raised while using `exchange`.
fn channel_error(err: lapin::Error, exchange: &str) -> Error {
    match err {
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            Error::channel_closed(exchange)
        }
        other => Error::transport(other.to_string()),
    }
}

/// Fails a publish the broker refused.
fn check_confirmation(confirmation: &Confirmation, exchange: &str) -> Result<()> {
    match confirmation {
        Confirmation::Nack(_) => Err(Error::transport(format!(
            "broker rejected message for exchange '{exchange}'"
        ))),
        Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        }
    }
}

// ============================================================================
// AmqpTransport
// ============================================================================

/// [`Transport`] connecting to an AMQP broker such as RabbitMQ.
#[derive(Debug, Clone, Default)]
pub struct AmqpTransport;

impl AmqpTransport {
    /// Creates a new AMQP transport.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn TransportConnection>> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| Error::connection(format!("{url}: {e}")))?;

        Ok(Arc::new(AmqpConnection { inner: connection }))
    }
}

// ============================================================================
// AmqpConnection
// ============================================================================

struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl TransportConnection for AmqpConnection {
    fn on_error(&self, listener: ConnectionListener) {
        self.inner
            .on_error(move |err| listener(Error::connection(err.to_string())));
    }

    async fn create_channel(&self) -> Result<Arc<dyn TransportChannel>> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|e| Error::connection(e.to_string()))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| Error::connection(e.to_string()))?;

        Ok(Arc::new(AmqpChannel { inner: channel }))
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close(REPLY_SUCCESS, CLOSE_REASON)
            .await
            .map_err(|e| Error::transport(e.to_string()))
    }
}

// ============================================================================
// AmqpChannel
// ============================================================================

struct AmqpChannel {
    inner: Channel,
}

#[async_trait]
impl TransportChannel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()> {
        let options = ExchangeDeclareOptions {
            durable,
            ..ExchangeDeclareOptions::default()
        };

        self.inner
            .exchange_declare(name, kind.into(), options, FieldTable::default())
            .await
            .map_err(|e| channel_error(e, name))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let confirm = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| channel_error(e, exchange))?;

        let confirmation = confirm.await.map_err(|e| channel_error(e, exchange))?;
        check_confirmation(&confirmation, exchange)
    }

    async fn consume(
        &self,
        exchange: &str,
        routing_key: &str,
        on_delivery: DeliveryCallback,
    ) -> Result<String> {
        let queue_options = QueueDeclareOptions {
            exclusive: true,
            durable: false,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .inner
            .queue_declare("", queue_options, FieldTable::default())
            .await
            .map_err(|e| channel_error(e, exchange))?;
        let queue_name = queue.name().as_str().to_owned();

        self.inner
            .queue_bind(
                &queue_name,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| channel_error(e, exchange))?;

        let consume_options = BasicConsumeOptions {
            no_ack: true,
            ..BasicConsumeOptions::default()
        };
        let mut consumer = self
            .inner
            .basic_consume(&queue_name, "", consume_options, FieldTable::default())
            .await
            .map_err(|e| channel_error(e, exchange))?;

        debug!(exchange, queue = %queue_name, "Waiting for messages");

        let queue_label = queue_name.clone();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => on_delivery(delivery.data),
                    Err(e) => {
                        warn!(queue = %queue_label, error = %e, "Consumer stopped");
                        break;
                    }
                }
            }
            debug!(queue = %queue_label, "Consumer stream ended");
        });

        Ok(queue_name)
    }
}

// ============================================================================
// Tests
// ============================================================================
