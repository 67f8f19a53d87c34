//! Per-session queue of QoS 1/2 publishes awaiting acknowledgement
//!
//! Entries stay in insertion order so a reconnecting client gets its
//! unacknowledged publishes replayed in the order they were first sent.
//! The queue also tracks an approximate byte footprint that callers compare
//! against the configured in-flight budget.

use std::collections::VecDeque;
use std::num::NonZeroU16;

use ahash::AHashSet;
use tracing::warn;

use crate::metrics;
use crate::protocol::{ProtocolError, Publish, QoS, ReasonCode};

/// QoS 2 message state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos2State {
    /// PUBLISH sent, waiting for PUBREC
    WaitingPubRec,
    /// PUBREC received, PUBREL sent, waiting for PUBCOMP
    WaitingPubComp,
}

/// A publish tagged with the packet identifier it was sent under
#[derive(Debug, Clone)]
pub struct QueuedPublish {
    publish: Publish,
    packet_id: NonZeroU16,
    qos2_state: Option<Qos2State>,
}

impl QueuedPublish {
    fn new(mut publish: Publish, packet_id: NonZeroU16) -> Self {
        publish.packet_id = Some(packet_id.get());
        publish.drop_cached_segments();
        let qos2_state = (publish.qos == QoS::ExactlyOnce).then_some(Qos2State::WaitingPubRec);
        Self {
            publish,
            packet_id,
            qos2_state,
        }
    }

    pub fn packet_id(&self) -> u16 {
        self.packet_id.get()
    }

    pub fn publish(&self) -> &Publish {
        &self.publish
    }

    pub fn into_publish(self) -> Publish {
        self.publish
    }

    /// Handshake phase, `None` for QoS 1
    pub fn qos2_state(&self) -> Option<Qos2State> {
        self.qos2_state
    }

    #[inline]
    pub fn footprint(&self) -> usize {
        self.publish.footprint()
    }
}

const PACKET_ID_ZERO: ProtocolError =
    ProtocolError::new("packet id cannot be 0", ReasonCode::ProtocolError);
const PACKET_ID_IN_USE: ProtocolError =
    ProtocolError::new("packet id already in flight", ReasonCode::PacketIdInUse);

/// Outgoing QoS 1/2 publishes of one client session.
///
/// Owned by the session; no internal locking.
#[derive(Debug, Default)]
pub struct QosPublishQueue {
    queue: VecDeque<QueuedPublish>,
    ids: AHashSet<u16>,
    bytes: usize,
    next_packet_id: u16,
}

impl QosPublishQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `publish` under `packet_id`.
    ///
    /// The id must be non-zero and not already queued.
    pub fn enqueue(&mut self, publish: Publish, packet_id: u16) -> Result<(), ProtocolError> {
        let id = NonZeroU16::new(packet_id).ok_or(PACKET_ID_ZERO)?;
        if !self.ids.insert(packet_id) {
            return Err(PACKET_ID_IN_USE);
        }

        let entry = QueuedPublish::new(publish, id);
        self.bytes += entry.footprint();
        self.queue.push_back(entry);
        Ok(())
    }

    /// Queue a copy of a routed publish, capped at the subscription's QoS.
    pub fn enqueue_with_max_qos(
        &mut self,
        publish: &Publish,
        packet_id: u16,
        max_qos: QoS,
    ) -> Result<(), ProtocolError> {
        let mut copy = publish.lightweight_clone();
        copy.qos = copy.qos.min(max_qos);
        copy.dup = false;
        if copy.qos == QoS::AtMostOnce {
            return Err(ProtocolError::new(
                "QoS 0 publishes are not queued",
                ReasonCode::ImplementationError,
            ));
        }
        self.enqueue(copy, packet_id)
    }

    /// Remove the entry with `packet_id`, if any
    pub fn remove(&mut self, packet_id: u16) -> Option<QueuedPublish> {
        if !self.ids.contains(&packet_id) {
            return None;
        }
        let index = self
            .queue
            .iter()
            .position(|q| q.packet_id() == packet_id)?;
        self.remove_at(index)
    }

    /// PUBREC arrived for a QoS 2 publish. Returns false for unknown ids.
    pub fn mark_released(&mut self, packet_id: u16) -> bool {
        match self
            .queue
            .iter_mut()
            .find(|q| q.packet_id() == packet_id)
        {
            Some(entry) if entry.qos2_state.is_some() => {
                entry.qos2_state = Some(Qos2State::WaitingPubComp);
                true
            }
            _ => false,
        }
    }

    /// Next free packet identifier, skipping ids still in the queue.
    ///
    /// `None` only when all 65535 ids are in flight.
    pub fn next_packet_id(&mut self) -> Option<u16> {
        if self.ids.len() >= u16::MAX as usize {
            return None;
        }
        loop {
            self.next_packet_id = self.next_packet_id.wrapping_add(1);
            if self.next_packet_id == 0 {
                self.next_packet_id = 1;
            }
            if !self.ids.contains(&self.next_packet_id) {
                return Some(self.next_packet_id);
            }
        }
    }

    /// Positional access for sweeps that remove while iterating
    pub fn cursor_front(&mut self) -> Cursor<'_> {
        Cursor {
            queue: self,
            index: 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedPublish> {
        self.queue.iter()
    }

    /// Remove every entry in order, resetting the accounting
    pub fn drain(&mut self) -> impl Iterator<Item = QueuedPublish> + '_ {
        self.ids.clear();
        self.bytes = 0;
        self.queue.drain(..)
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Approximate bytes held by queued publishes (topic + payload)
    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    fn remove_at(&mut self, index: usize) -> Option<QueuedPublish> {
        let entry = self.queue.remove(index)?;
        self.ids.remove(&entry.packet_id());
        self.release_bytes(entry.footprint());
        Some(entry)
    }

    fn release_bytes(&mut self, amount: usize) {
        debug_assert!(
            amount <= self.bytes,
            "byte accounting drift: releasing {} of {} tracked bytes",
            amount,
            self.bytes
        );
        self.bytes = clamped_release(self.bytes, amount);
    }
}

/// `tracked - released`, floored at zero. Underflow is logged and counted.
fn clamped_release(tracked: usize, released: usize) -> usize {
    match tracked.checked_sub(released) {
        Some(remaining) => remaining,
        None => {
            warn!(
                tracked,
                released, "QoS queue byte count would go negative, clamping to zero"
            );
            if let Some(m) = metrics::global() {
                m.qos_queue_byte_drift.inc();
            }
            0
        }
    }
}

impl<'a> IntoIterator for &'a QosPublishQueue {
    type Item = &'a QueuedPublish;
    type IntoIter = std::collections::vec_deque::Iter<'a, QueuedPublish>;

    fn into_iter(self) -> Self::IntoIter {
        self.queue.iter()
    }
}

/// A position in a [`QosPublishQueue`].
///
/// Removing the current entry leaves the cursor on the entry after it.
pub struct Cursor<'a> {
    queue: &'a mut QosPublishQueue,
    index: usize,
}

impl Cursor<'_> {
    pub fn current(&self) -> Option<&QueuedPublish> {
        self.queue.queue.get(self.index)
    }

    pub fn move_next(&mut self) {
        if self.index < self.queue.queue.len() {
            self.index += 1;
        }
    }

    /// Remove the current entry and advance to the next one
    pub fn remove_current(&mut self) -> Option<QueuedPublish> {
        self.queue.remove_at(self.index)
    }

    pub fn is_end(&self) -> bool {
        self.index >= self.queue.queue.len()
    }
}
