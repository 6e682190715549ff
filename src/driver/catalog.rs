//! Channel and handler catalog.
//!
//! The catalog is the driver's memory of the topology it has built: which
//! channels exist, which exchange kind each was declared with, and which
//! handlers were subscribed to each, in subscription order. Recovery reads
//! it to rebuild the topology on a fresh connection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::transport::{ExchangeKind, TransportChannel};

// ============================================================================
// Types
// ============================================================================

/// Application callback invoked once per inbound message.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

// ============================================================================
// ChannelEntry
// ============================================================================

/// Catalog record for a single channel name.
pub(crate) struct ChannelEntry {
    /// Transport channel; `None` until the first successful creation.
    pub channel: Option<Arc<dyn TransportChannel>>,
    /// Exchange kind the channel was created with.
    pub kind: ExchangeKind,
    /// Handlers in registration order.
    pub handlers: Vec<MessageHandler>,
}

impl fmt::Debug for ChannelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEntry")
            .field("open", &self.channel.is_some())
            .field("kind", &self.kind)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

// ============================================================================
// ChannelCatalog
// ============================================================================

/// Channel table keyed by channel name.
#[derive(Debug, Default)]
pub(crate) struct ChannelCatalog {
    entries: FxHashMap<String, ChannelEntry>,
}

impl ChannelCatalog {
    /// Stores a (re)created channel, keeping any handlers already registered.
    pub fn insert_channel(
        &mut self,
        name: &str,
        channel: Arc<dyn TransportChannel>,
        kind: ExchangeKind,
    ) {
        let entry = self
            .entries
            .entry(name.to_owned())
            .or_insert_with(|| ChannelEntry {
                channel: None,
                kind,
                handlers: Vec::new(),
            });
        entry.channel = Some(channel);
        entry.kind = kind;
    }

    /// Returns the transport channel for `name`, if created.
    pub fn channel(&self, name: &str) -> Option<Arc<dyn TransportChannel>> {
        self.entries.get(name).and_then(|e| e.channel.clone())
    }

    /// Returns `true` if `name` has a populated channel.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| e.channel.is_some())
    }

    /// Appends a handler to the channel's list.
    ///
    /// Returns `false` if the channel is unknown.
    pub fn push_handler(&mut self, name: &str, handler: MessageHandler) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.handlers.push(handler);
                true
            }
            None => false,
        }
    }

    /// Returns the number of handlers registered on `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        self.entries.get(name).map_or(0, |e| e.handlers.len())
    }

    /// Returns every channel name with a populated channel, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.channel.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Channels to recreate after a reconnect, with their kinds.
    pub fn recreation_plan(&self) -> Vec<(String, ExchangeKind)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.channel.is_some())
            .map(|(name, e)| (name.clone(), e.kind))
            .collect()
    }

    /// Handlers to re-subscribe after a reconnect, in registration order.
    pub fn replay_plan(&self) -> Vec<(String, Vec<MessageHandler>)> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.handlers.is_empty())
            .map(|(name, e)| (name.clone(), e.handlers.clone()))
            .collect()
    }

    /// Forgets every channel and handler.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
