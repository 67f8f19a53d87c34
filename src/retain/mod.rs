//! Retained messages
//!
//! The live, in-memory retained table. At most one message per topic; a
//! retained publish with an empty payload deletes the entry. The table is
//! shared between workers and snapshotted for persistence.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::metrics;
use crate::protocol::{ProtocolError, Publish, QoS, ReasonCode};
use crate::topic::TopicMatcher;

/// What the broker does with publishes that carry the retain flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetainMode {
    /// Store and deliver retained messages
    #[default]
    Enabled,
    /// Route the publish but clear its retain flag
    Downgrade,
    /// Discard retained publishes entirely
    Drop,
    /// Disconnect the client with Retain not supported
    DisconnectWithError,
}

/// Outcome of [`RetainedTable::accept`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainDecision {
    /// Publish has no retain flag, nothing to do
    NotRetained,
    /// Route the publish and store it in the table
    Store,
    /// Route the publish, its retain flag has been cleared
    Downgraded,
    /// Do not route or store the publish
    Drop,
}

/// A publish held in the retained table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedMessage {
    publish: Publish,
}

impl RetainedMessage {
    pub fn new(mut publish: Publish) -> Self {
        publish.clear_client_specific();
        publish.normalize_origin();
        publish.retain = true;
        Self { publish }
    }

    pub fn publish(&self) -> &Publish {
        &self.publish
    }

    pub fn into_publish(self) -> Publish {
        self.publish
    }

    pub fn topic(&self) -> &Arc<str> {
        &self.publish.topic
    }

    /// An empty retained message is a deletion marker
    pub fn is_empty(&self) -> bool {
        self.publish.payload.is_empty()
    }

    #[inline]
    pub fn footprint(&self) -> usize {
        self.publish.footprint()
    }

    fn is_stale(&self, max_age: Option<Duration>) -> bool {
        self.publish.has_expired() || max_age.is_some_and(|max| self.publish.age() > max)
    }

    /// Copy for delivery to a new subscriber
    fn for_delivery(&self, max_qos: QoS) -> Publish {
        let mut publish = self.publish.lightweight_clone();
        publish.qos = publish.qos.min(max_qos);
        publish.refresh_expiry_property();
        publish
    }
}

/// Thread-safe retained message table
#[derive(Debug, Default)]
pub struct RetainedTable {
    messages: RwLock<AHashMap<Arc<str>, RetainedMessage>>,
}

impl RetainedTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the configured retain mode to an incoming publish
    pub fn accept(publish: &mut Publish, mode: RetainMode) -> Result<RetainDecision, ProtocolError> {
        if !publish.retain {
            return Ok(RetainDecision::NotRetained);
        }

        match mode {
            RetainMode::Enabled => Ok(RetainDecision::Store),
            RetainMode::Downgrade => {
                publish.retain = false;
                Ok(RetainDecision::Downgraded)
            }
            RetainMode::Drop => Ok(RetainDecision::Drop),
            RetainMode::DisconnectWithError => Err(ProtocolError::new(
                "retained messages are not supported",
                ReasonCode::RetainNotSupported,
            )),
        }
    }

    /// Store a retained publish, or delete the topic's entry if the payload is empty.
    ///
    /// Returns the message it replaced.
    pub fn set(&self, publish: Publish) -> Option<RetainedMessage> {
        let message = RetainedMessage::new(publish);
        let mut messages = self.messages.write();

        let previous = if message.is_empty() {
            messages.remove(message.topic())
        } else {
            let added = message.footprint();
            let previous = messages.insert(message.topic().clone(), message);
            if let Some(m) = metrics::global() {
                m.retained_message_stored(added);
            }
            previous
        };

        if let (Some(prev), Some(m)) = (&previous, metrics::global()) {
            m.retained_message_removed(prev.footprint());
        }
        previous
    }

    pub fn get(&self, topic: &str) -> Option<RetainedMessage> {
        self.messages.read().get(topic).cloned()
    }

    /// Retained publishes matching a subscription filter, ready to deliver.
    ///
    /// Expired messages are skipped and QoS is capped at `max_qos`.
    pub fn matching(&self, filter: &str, max_qos: QoS, matcher: &mut TopicMatcher) -> Vec<Publish> {
        let messages = self.messages.read();

        if !filter.contains(['+', '#']) {
            return messages
                .get(filter)
                .filter(|m| !m.publish.has_expired())
                .map(|m| vec![m.for_delivery(max_qos)])
                .unwrap_or_default();
        }

        messages
            .values()
            .filter(|m| !m.publish.has_expired() && matcher.matches(filter, m.topic()))
            .map(|m| m.for_delivery(max_qos))
            .collect()
    }

    /// Consistent copy of the whole table, taken under the read lock
    pub fn snapshot(&self) -> Vec<RetainedMessage> {
        self.messages.read().values().cloned().collect()
    }

    /// Drop messages past their expiry interval or older than `max_age`.
    ///
    /// Returns the number removed.
    pub fn expire(&self, max_age: Option<Duration>) -> usize {
        let mut removed_bytes = 0;
        let mut removed = 0;
        self.messages.write().retain(|_, m| {
            if m.is_stale(max_age) {
                removed += 1;
                removed_bytes += m.footprint();
                false
            } else {
                true
            }
        });

        if removed > 0 {
            if let Some(m) = metrics::global() {
                m.retained_messages_current.sub(removed as i64);
                m.retained_bytes_current.sub(removed_bytes as i64);
            }
            debug!(removed, "Expired retained messages");
        }
        removed
    }

    /// Insert previously persisted messages, skipping empty and expired ones.
    ///
    /// Returns the number inserted.
    pub fn load_from(&self, messages: impl IntoIterator<Item = RetainedMessage>) -> usize {
        let mut loaded = 0;
        for message in messages {
            if message.is_empty() || message.publish.has_expired() {
                continue;
            }
            self.set(message.into_publish());
            loaded += 1;
        }
        loaded
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}
