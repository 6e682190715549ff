//! Error types for the notifier stack.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use resilient_notifier::{Error, Result};
//!
//! async fn example(driver: &BrokerDriver) -> Result<()> {
//!     driver.publish("notifications", &json!({"a": 1})).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::NotConnected`], [`Error::DriverClosed`] |
//! | Channel | [`Error::ChannelNotFound`], [`Error::ChannelClosed`] |
//! | External | [`Error::Transport`], [`Error::Json`] |
//!
//! Payloads that fail to parse never surface as errors; the codec
//! degrades them to raw text.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when driver options or environment values are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Broker connection failed.
    ///
    /// The driver retries these internally; only raw transports return them.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Operation needs a live connection but the driver has none.
    #[error("Not connected to broker")]
    NotConnected,

    /// Operation attempted after [`close`](crate::BrokerDriver::close).
    #[error("Driver closed")]
    DriverClosed,

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// Channel name was never created on this driver.
    #[error("Channel not found: {channel}")]
    ChannelNotFound {
        /// The unknown channel name.
        channel: String,
    },

    /// Transport channel is no longer usable.
    ///
    /// Publishing on a closed channel also starts a reconnect.
    #[error("Channel closed: {channel}")]
    ChannelClosed {
        /// Name of the closed channel.
        channel: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// Transport failure that is neither a connect nor a closed-channel error.
    #[error("Transport error: {message}")]
    Transport {
        /// Description reported by the transport.
        message: String,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a channel not found error.
    #[inline]
    pub fn channel_not_found(channel: impl Into<String>) -> Self {
        Self::ChannelNotFound {
            channel: channel.into(),
        }
    }

    /// Creates a channel closed error.
    #[inline]
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::NotConnected | Self::DriverClosed
        )
    }

    /// Returns `true` if this error concerns a single channel.
    #[inline]
    #[must_use]
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotFound { .. } | Self::ChannelClosed { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed once the driver has reconnected.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::NotConnected | Self::ChannelClosed { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
