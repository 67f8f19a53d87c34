//! MQTT protocol types used by the routing core
//!
//! Only the slice of the protocol the core needs: QoS levels, protocol
//! versions, the PUBLISH value type with its v5.0 properties, and the
//! reason codes a caller needs to disconnect a misbehaving client.

mod error;
mod properties;
mod publish;
mod reason;

pub use error::{DecodeError, EncodeError, ProtocolError};
pub use properties::{Properties, PropertyId};
pub use publish::{Publish, WillMetadata, WillPublish};
pub use reason::ReasonCode;

/// MQTT Protocol Version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// MQTT v3.1.1 (protocol level 4)
    V311 = 4,
    /// MQTT v5.0 (protocol level 5)
    V5 = 5,
}

impl ProtocolVersion {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            4 => Some(ProtocolVersion::V311),
            5 => Some(ProtocolVersion::V5),
            _ => None,
        }
    }
}

/// Quality of Service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery
    #[default]
    AtMostOnce = 0,
    /// At least once delivery
    AtLeastOnce = 1,
    /// Exactly once delivery
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    /// Returns the minimum of two QoS levels (for subscription matching)
    pub fn min(self, other: Self) -> Self {
        if (self as u8) < (other as u8) {
            self
        } else {
            other
        }
    }

    /// Whether delivery at this level needs an acknowledgement handshake
    #[inline]
    pub fn needs_ack(self) -> bool {
        self != QoS::AtMostOnce
    }
}
