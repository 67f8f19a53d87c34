//! MQTT v5.0 Reason Codes
//!
//! The subset a routing core hands back to its caller: publish outcomes,
//! topic and share syntax failures, and packet identifier bookkeeping.

use std::fmt;

/// MQTT v5.0 Reason Code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ReasonCode {
    /// Success
    #[default]
    Success = 0x00,
    /// Malformed Packet
    MalformedPacket = 0x81,
    /// Protocol Error
    ProtocolError = 0x82,
    /// Implementation specific error
    ImplementationError = 0x83,
    /// Topic Filter invalid
    TopicFilterInvalid = 0x8F,
    /// Topic Name invalid
    TopicNameInvalid = 0x90,
    /// Packet Identifier in use
    PacketIdInUse = 0x91,
    /// Packet too large
    PacketTooLarge = 0x95,
    /// Retain not supported
    RetainNotSupported = 0x9A,
}

impl ReasonCode {
    /// Create a ReasonCode from a byte value
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(ReasonCode::Success),
            0x81 => Some(ReasonCode::MalformedPacket),
            0x82 => Some(ReasonCode::ProtocolError),
            0x83 => Some(ReasonCode::ImplementationError),
            0x8F => Some(ReasonCode::TopicFilterInvalid),
            0x90 => Some(ReasonCode::TopicNameInvalid),
            0x91 => Some(ReasonCode::PacketIdInUse),
            0x95 => Some(ReasonCode::PacketTooLarge),
            0x9A => Some(ReasonCode::RetainNotSupported),
            _ => None,
        }
    }

    /// Check if this reason code indicates success
    #[inline]
    pub fn is_success(self) -> bool {
        (self as u8) < 0x80
    }

    /// Check if this reason code indicates failure
    #[inline]
    pub fn is_error(self) -> bool {
        (self as u8) >= 0x80
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::Success => write!(f, "Success"),
            ReasonCode::MalformedPacket => write!(f, "Malformed Packet"),
            ReasonCode::ProtocolError => write!(f, "Protocol Error"),
            ReasonCode::ImplementationError => write!(f, "Implementation specific error"),
            ReasonCode::TopicFilterInvalid => write!(f, "Topic Filter invalid"),
            ReasonCode::TopicNameInvalid => write!(f, "Topic Name invalid"),
            ReasonCode::PacketIdInUse => write!(f, "Packet Identifier in use"),
            ReasonCode::PacketTooLarge => write!(f, "Packet too large"),
            ReasonCode::RetainNotSupported => write!(f, "Retain not supported"),
        }
    }
}
