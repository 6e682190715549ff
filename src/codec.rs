//! Message codec.
//!
//! Converts between application values and the textual payloads carried
//! by the broker. Text passes through untouched, everything else is JSON.
//! Decoding never fails: payloads that are not JSON come back as
//! [`Value::String`].

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::warn;

// ============================================================================
// Constants
// ============================================================================

/// Number of characters shown when a payload is logged.
const PREVIEW_CHARS: usize = 40;

// ============================================================================
// Text Codec
// ============================================================================

/// Formats a message for the wire.
///
/// Strings are passed through as-is; any other value is serialized to JSON.
#[must_use]
pub fn format(message: &Value) -> String {
    match message {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Parses a payload received from the wire.
///
/// Returns the original text as [`Value::String`] if it is not valid JSON.
#[must_use]
pub fn parse(text: &str) -> Value {
    match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(payload = %preview(text), error = %e, "Message cannot be parsed, passing raw text");
            Value::String(text.to_owned())
        }
    }
}

// ============================================================================
// Byte Codec
// ============================================================================

/// Encodes a message into transport bytes.
#[inline]
#[must_use]
pub fn encode(message: &Value) -> Vec<u8> {
    format(message).into_bytes()
}

/// Decodes transport bytes into a message.
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
#[must_use]
pub fn decode(bytes: &[u8]) -> Value {
    parse(&String::from_utf8_lossy(bytes))
}

/// Returns the first few characters of a payload for log lines.
#[must_use]
pub fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// Tests
// ============================================================================
