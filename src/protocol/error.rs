//! Protocol error types

use std::fmt;

use super::ReasonCode;

/// Errors that can occur during packet decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough data in buffer
    InsufficientData,
    /// Invalid packet type
    InvalidPacketType(u8),
    /// Invalid remaining length encoding
    InvalidRemainingLength,
    /// Invalid QoS value
    InvalidQoS(u8),
    /// Invalid UTF-8 string
    InvalidUtf8,
    /// Invalid property identifier
    InvalidPropertyId(u8),
    /// Duplicate property (not allowed)
    DuplicateProperty(u8),
    /// Malformed packet
    MalformedPacket(&'static str),
    /// Packet too large
    PacketTooLarge,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidPacketType(t) => write!(f, "invalid packet type: {}", t),
            Self::InvalidRemainingLength => write!(f, "invalid remaining length encoding"),
            Self::InvalidQoS(q) => write!(f, "invalid QoS value: {}", q),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            Self::InvalidPropertyId(id) => write!(f, "invalid property identifier: {}", id),
            Self::DuplicateProperty(id) => write!(f, "duplicate property: {}", id),
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
            Self::PacketTooLarge => write!(f, "packet too large"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur during packet encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Packet too large
    PacketTooLarge,
    /// String too long
    StringTooLong,
    /// QoS > 0 publish without a packet identifier
    MissingPacketId,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::StringTooLong => write!(f, "string too long"),
            Self::MissingPacketId => write!(f, "QoS > 0 publish without packet identifier"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// A client sent something the protocol forbids.
///
/// Recoverable at the connection level only: the caller disconnects the
/// client with [`ProtocolError::reason_code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    message: &'static str,
    reason_code: ReasonCode,
}

impl ProtocolError {
    pub const fn new(message: &'static str, reason_code: ReasonCode) -> Self {
        Self {
            message,
            reason_code,
        }
    }

    pub fn message(&self) -> &'static str {
        self.message
    }

    /// Reason code to send in the DISCONNECT (v5.0)
    pub fn reason_code(&self) -> ReasonCode {
        self.reason_code
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error: {} ({})", self.message, self.reason_code)
    }
}

impl std::error::Error for ProtocolError {}

impl From<DecodeError> for ProtocolError {
    fn from(e: DecodeError) -> Self {
        let message = match e {
            DecodeError::InvalidUtf8 => "invalid UTF-8 string",
            DecodeError::PacketTooLarge => "packet too large",
            _ => "malformed packet",
        };
        let reason_code = match e {
            DecodeError::PacketTooLarge => ReasonCode::PacketTooLarge,
            _ => ReasonCode::MalformedPacket,
        };
        ProtocolError::new(message, reason_code)
    }
}
