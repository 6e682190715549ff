//! Driver connection options.
//!
//! Provides the broker endpoint and the reconnect backoff policy, either
//! built in code or read from the environment.
//!
//! # Environment
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `AMQP_URL` | `amqp://localhost:5673` | broker endpoint |
//! | `AMQP_RECONNECT_DELAY_MS` | `5000` | delay between connection attempts |
//! | `AMQP_RECONNECT_MAX_DELAY_MS` | unset | enables doubling backoff capped at this value |
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use resilient_notifier::{DriverOptions, ReconnectPolicy};
//!
//! let options = DriverOptions::new("amqp://rabbit:5672")
//!     .with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(1)));
//! options.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable holding the broker URL.
pub const URL_ENV: &str = "AMQP_URL";

/// Environment variable holding the reconnect delay in milliseconds.
pub const RECONNECT_DELAY_ENV: &str = "AMQP_RECONNECT_DELAY_MS";

/// Environment variable holding the reconnect delay cap in milliseconds.
pub const RECONNECT_MAX_DELAY_ENV: &str = "AMQP_RECONNECT_MAX_DELAY_MS";

/// Broker URL used when none is configured.
pub const DEFAULT_URL: &str = "amqp://localhost:5673";

/// Delay between connection attempts (5s).
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Delay schedule between connection attempts.
///
/// Retries never stop; the policy only controls how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on the delay.
    pub max: Duration,
    /// Growth factor applied per attempt (1 = fixed).
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Same delay before every attempt.
    #[inline]
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1,
        }
    }

    /// Doubling delay starting at `initial`, capped at `max`.
    #[inline]
    #[must_use]
    pub const fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2,
        }
    }

    /// Returns the delay to wait after `attempt` consecutive failures.
    ///
    /// `attempt` is zero-based.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

// ============================================================================
// DriverOptions
// ============================================================================

/// Connection options for [`BrokerDriver`](super::BrokerDriver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    /// Broker endpoint (`amqp://` or `amqps://`).
    pub url: String,

    /// Backoff between connection attempts.
    pub reconnect: ReconnectPolicy,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl DriverOptions {
    /// Creates options for `url` with the default reconnect policy.
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Reads options from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a delay variable is not a number or the
    /// URL is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads options through `lookup`, which maps variable names to values.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup(URL_ENV).unwrap_or_else(|| DEFAULT_URL.to_string());

        let delay = match lookup(RECONNECT_DELAY_ENV) {
            Some(raw) => parse_millis(RECONNECT_DELAY_ENV, &raw)?,
            None => DEFAULT_RECONNECT_DELAY,
        };

        let reconnect = match lookup(RECONNECT_MAX_DELAY_ENV) {
            Some(raw) => {
                let max = parse_millis(RECONNECT_MAX_DELAY_ENV, &raw)?;
                ReconnectPolicy::exponential(delay, max.max(delay))
            }
            None => ReconnectPolicy::fixed(delay),
        };

        let options = Self { url, reconnect };
        options.validate()?;
        Ok(options)
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse or its scheme is
    /// not `amqp`/`amqps`.
    pub fn validate(&self) -> Result<()> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| Error::config(format!("Invalid broker URL '{}': {e}", self.url)))?;

        match parsed.scheme() {
            "amqp" | "amqps" => Ok(()),
            other => Err(Error::config(format!(
                "Unsupported broker URL scheme '{other}', expected amqp or amqps"
            ))),
        }
    }
}

/// Parses a millisecond count from an environment value.
fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| Error::config(format!("{key} must be a number of milliseconds: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
