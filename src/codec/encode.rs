//! PUBLISH Encoder
//!
//! Encodes PUBLISH packets for both v3.1.1 and v5.0

use bytes::{BufMut, BytesMut};

use super::{variable_int_len, write_string, write_variable_int, PUBLISH_PACKET_TYPE};
use crate::protocol::{EncodeError, ProtocolVersion, Publish, QoS};

/// PUBLISH packet encoder
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    protocol_version: ProtocolVersion,
}

impl Encoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            protocol_version: version,
        }
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Remaining length of the encoded PUBLISH (everything after the fixed header)
    pub fn remaining_length(&self, packet: &Publish) -> usize {
        // topic length prefix + topic
        let mut remaining_length = 2 + packet.topic.len();

        if packet.qos != QoS::AtMostOnce {
            remaining_length += 2; // packet identifier
        }

        if self.protocol_version == ProtocolVersion::V5 {
            let props_len = packet.properties.encoded_size();
            remaining_length += variable_int_len(props_len as u32) + props_len;
        }

        remaining_length + packet.payload.len()
    }

    /// Length of the fixed header: the type/flags byte plus the remaining length
    pub fn fixed_header_len(&self, packet: &Publish) -> usize {
        1 + variable_int_len(self.remaining_length(packet) as u32)
    }

    /// Total encoded size of the packet
    pub fn encoded_len(&self, packet: &Publish) -> usize {
        let remaining = self.remaining_length(packet);
        1 + variable_int_len(remaining as u32) + remaining
    }

    /// Encode a PUBLISH to the buffer
    pub fn encode(&self, packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let remaining_length = self.remaining_length(packet);
        if remaining_length > super::MAX_REMAINING_LENGTH {
            return Err(EncodeError::PacketTooLarge);
        }
        buf.reserve(1 + variable_int_len(remaining_length as u32) + remaining_length);

        // Fixed header
        let mut first_byte: u8 = PUBLISH_PACKET_TYPE << 4;
        if packet.dup {
            first_byte |= 0x08;
        }
        first_byte |= (packet.qos as u8) << 1;
        if packet.retain {
            first_byte |= 0x01;
        }
        buf.put_u8(first_byte);
        write_variable_int(buf, remaining_length as u32)?;

        write_string(buf, &packet.topic)?;

        // Packet identifier (only for QoS > 0)
        if packet.qos != QoS::AtMostOnce {
            let packet_id = packet
                .packet_id
                .ok_or(EncodeError::MissingPacketId)?;
            buf.put_u16(packet_id);
        }

        if self.protocol_version == ProtocolVersion::V5 {
            packet.properties.encode(buf)?;
        }

        buf.put_slice(&packet.payload);

        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(ProtocolVersion::V5)
    }
}
