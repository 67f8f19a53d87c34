//! The PUBLISH value type shared by dispatch, the QoS queue and the retained store

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::{Properties, QoS};
use crate::topic::SegmentSplitter;

/// A publish message as the broker carries it around.
///
/// The topic field uses `Arc<str>` for efficient fan-out: when routing a message
/// to multiple subscribers, cloning the topic is O(1) instead of O(n) for String.
///
/// Age is derived from the creation instant. Publishes reconstructed from disk
/// carry an extra age offset installed by [`Publish::backdate`], so expiry keeps
/// counting across a restart.
#[derive(Debug, Clone)]
pub struct Publish {
    /// Duplicate delivery flag
    pub dup: bool,
    /// Quality of service
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
    /// Topic name
    pub topic: Arc<str>,
    /// Packet identifier (present only for QoS > 0 on the wire)
    pub packet_id: Option<u16>,
    /// Payload
    pub payload: Bytes,
    /// Properties (v5.0 only)
    pub properties: Properties,
    /// Originating client, only filled in for persisted publishes
    pub client_id: Option<Arc<str>>,
    /// Originating username, only filled in for persisted publishes
    pub username: Option<Arc<str>>,
    created_at: Instant,
    age_offset: Duration,
    expire_after: Option<Duration>,
    /// Cached topic split, derived state
    segments: Option<Arc<[Range<usize>]>>,
}

impl Publish {
    pub fn new(topic: impl Into<Arc<str>>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            dup: false,
            qos,
            retain: false,
            topic: topic.into(),
            packet_id: None,
            payload: payload.into(),
            properties: Properties::default(),
            client_id: None,
            username: None,
            created_at: Instant::now(),
            age_offset: Duration::ZERO,
            expire_after: None,
            segments: None,
        }
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Attach properties; a message expiry interval becomes the expiry of this publish
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.expire_after = properties
            .message_expiry_interval
            .map(|s| Duration::from_secs(s as u64));
        self.properties = properties;
        self
    }

    /// Record who published this; empty strings count as absent
    pub fn with_origin(mut self, client_id: Option<Arc<str>>, username: Option<Arc<str>>) -> Self {
        self.client_id = client_id;
        self.username = username;
        self.normalize_origin();
        self
    }

    /// Collapse empty origin strings to `None`, the only form the retained store can represent
    pub fn normalize_origin(&mut self) {
        if self.client_id.as_deref() == Some("") {
            self.client_id = None;
        }
        if self.username.as_deref() == Some("") {
            self.username = None;
        }
    }

    pub fn topic_alias(&self) -> Option<u16> {
        self.properties.topic_alias
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since this publish was created, including any reconstructed age
    pub fn age(&self) -> Duration {
        self.created_at.elapsed() + self.age_offset
    }

    /// Treat this publish as if it was created `age` ago.
    pub fn backdate(&mut self, age: Duration) {
        self.created_at = Instant::now();
        self.age_offset = age;
    }

    pub fn expire_after(&self) -> Option<Duration> {
        self.expire_after
    }

    pub fn set_expire_after(&mut self, seconds: u32) {
        self.expire_after = Some(Duration::from_secs(seconds as u64));
    }

    pub fn has_expired(&self) -> bool {
        self.expire_after.is_some_and(|e| self.age() >= e)
    }

    /// Expiry time left, `None` when the publish never expires
    pub fn remaining_expiry(&self) -> Option<Duration> {
        self.expire_after.map(|e| e.saturating_sub(self.age()))
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.remaining_expiry().map(|left| Instant::now() + left)
    }

    /// Rewrite the message expiry interval to the time left, as required
    /// when forwarding a publish that has been waiting.
    pub fn refresh_expiry_property(&mut self) {
        if let Some(left) = self.remaining_expiry() {
            self.properties.message_expiry_interval =
                Some(left.as_secs().min(u32::MAX as u64) as u32);
        }
    }

    /// Approximate memory held by this publish
    #[inline]
    pub fn footprint(&self) -> usize {
        self.topic.len() + self.payload.len()
    }

    /// Strip per-hop state before the publish is stored or routed again
    pub fn clear_client_specific(&mut self) {
        self.dup = false;
        self.packet_id = None;
        self.properties.clear_client_specific();
    }

    /// Copy everything except derived caches.
    ///
    /// Topic and payload are reference counted, so this never copies message bytes.
    pub fn lightweight_clone(&self) -> Self {
        Self {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
            topic: self.topic.clone(),
            packet_id: self.packet_id,
            payload: self.payload.clone(),
            properties: self.properties.clone(),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            created_at: self.created_at,
            age_offset: self.age_offset,
            expire_after: self.expire_after,
            segments: None,
        }
    }

    /// Topic segments as byte ranges into `self.topic`, split once and cached.
    pub fn segments(&mut self, splitter: &dyn SegmentSplitter) -> Arc<[Range<usize>]> {
        let topic = &self.topic;
        self.segments
            .get_or_insert_with(|| {
                let mut parts = Vec::new();
                splitter.split(topic, &mut parts);
                parts.into()
            })
            .clone()
    }

    pub fn has_cached_segments(&self) -> bool {
        self.segments.is_some()
    }

    pub(crate) fn drop_cached_segments(&mut self) {
        self.segments = None;
    }
}

impl Default for Publish {
    fn default() -> Self {
        Self::new("", Bytes::new(), QoS::AtMostOnce)
    }
}

impl PartialEq for Publish {
    fn eq(&self, other: &Self) -> bool {
        self.dup == other.dup
            && self.qos == other.qos
            && self.retain == other.retain
            && self.topic == other.topic
            && self.packet_id == other.packet_id
            && self.payload == other.payload
            && self.properties == other.properties
            && self.client_id == other.client_id
            && self.username == other.username
    }
}

impl Eq for Publish {}

/// Will bookkeeping, only present when a publish serves as a session's will
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WillMetadata {
    /// Will delay interval in seconds
    pub will_delay: u32,
    queued_at: Option<Instant>,
}

impl WillMetadata {
    pub fn new(will_delay: u32) -> Self {
        Self {
            will_delay,
            queued_at: None,
        }
    }
}

/// A publish used as a session's last will
#[derive(Debug, Clone)]
pub struct WillPublish {
    pub publish: Publish,
    pub metadata: WillMetadata,
}

impl WillPublish {
    pub fn new(publish: Publish, will_delay: u32) -> Self {
        Self {
            publish,
            metadata: WillMetadata::new(will_delay),
        }
    }

    /// Mark the will as queued (the session went away)
    pub fn set_queued_at(&mut self) {
        self.metadata.queued_at = Some(Instant::now());
    }

    pub fn queued_at_age(&self) -> Option<Duration> {
        self.metadata.queued_at.map(|q| q.elapsed())
    }

    /// Whether the will delay has passed since queueing
    pub fn is_due(&self) -> bool {
        self.queued_at_age()
            .is_some_and(|age| age >= Duration::from_secs(self.metadata.will_delay as u64))
    }
}
