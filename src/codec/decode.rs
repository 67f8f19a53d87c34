//! PUBLISH Decoder
//!
//! Decodes PUBLISH packets for both v3.1.1 and v5.0

use std::sync::Arc;

use bytes::Bytes;

use super::{read_string, read_u16, read_variable_int, MAX_REMAINING_LENGTH, PUBLISH_PACKET_TYPE};
use crate::protocol::{DecodeError, Properties, ProtocolVersion, Publish, QoS};
use crate::topic::is_valid_utf8;

/// PUBLISH packet decoder
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    max_packet_size: usize,
    protocol_version: ProtocolVersion,
}

impl Decoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            max_packet_size: MAX_REMAINING_LENGTH,
            protocol_version: version,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_REMAINING_LENGTH);
        self
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Decode a PUBLISH from the buffer
    /// Returns (publish, bytes_consumed), or `None` when the packet is incomplete
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Publish, usize)>, DecodeError> {
        Ok(self
            .decode_framed(buf)?
            .map(|(publish, _, total_len)| (publish, total_len)))
    }

    /// Decode one complete PUBLISH whose fixed header length is already known.
    ///
    /// Used when reading stored packets: the buffer must hold exactly one
    /// packet and the recorded header length must agree with the encoding.
    pub fn decode_with_header_len(
        &self,
        buf: &[u8],
        fixed_header_len: usize,
    ) -> Result<Publish, DecodeError> {
        let (publish, header_len, total_len) = self
            .decode_framed(buf)?
            .ok_or(DecodeError::InsufficientData)?;
        if total_len != buf.len() {
            return Err(DecodeError::MalformedPacket("trailing bytes after packet"));
        }
        if header_len != fixed_header_len {
            return Err(DecodeError::MalformedPacket("fixed header length mismatch"));
        }
        Ok(publish)
    }

    /// Returns (publish, fixed_header_len, total_len)
    fn decode_framed(&self, buf: &[u8]) -> Result<Option<(Publish, usize, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        if packet_type != PUBLISH_PACKET_TYPE {
            return Err(DecodeError::InvalidPacketType(packet_type));
        }

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let header_len = 1 + len_bytes;
        let total_len = header_len + remaining_length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let publish = self.decode_publish(first_byte & 0x0F, &buf[header_len..total_len])?;
        Ok(Some((publish, header_len, total_len)))
    }

    fn decode_publish(&self, flags: u8, payload: &[u8]) -> Result<Publish, DecodeError> {
        let dup = (flags & 0x08) != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let retain = (flags & 0x01) != 0;

        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

        // MQTT-3.3.1-2: DUP must be 0 for QoS 0
        if qos == QoS::AtMostOnce && dup {
            return Err(DecodeError::MalformedPacket("DUP must be 0 for QoS 0"));
        }

        let mut pos = 0;

        let (topic, len) = read_string(payload)?;
        pos += len;

        if !is_valid_utf8(topic.as_bytes(), true) {
            if topic.contains(['+', '#']) {
                return Err(DecodeError::MalformedPacket("topic contains wildcard"));
            }
            return Err(DecodeError::InvalidUtf8);
        }

        let packet_id = if qos != QoS::AtMostOnce {
            let id = read_u16(&payload[pos..])?;
            if id == 0 {
                return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
            }
            pos += 2;
            Some(id)
        } else {
            None
        };

        let properties = match self.protocol_version {
            ProtocolVersion::V5 => {
                let (props, len) = Properties::decode(&payload[pos..])?;
                pos += len;
                props
            }
            ProtocolVersion::V311 => Properties::default(),
        };

        // An empty topic is only legal when a topic alias stands in for it
        if topic.is_empty() && properties.topic_alias.is_none() {
            return Err(DecodeError::MalformedPacket("empty topic without alias"));
        }

        let mut publish = Publish::new(
            Arc::<str>::from(topic),
            Bytes::copy_from_slice(&payload[pos..]),
            qos,
        )
        .with_retain(retain)
        .with_properties(properties);
        publish.dup = dup;
        publish.packet_id = packet_id;

        Ok(publish)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(ProtocolVersion::V5)
    }
}
