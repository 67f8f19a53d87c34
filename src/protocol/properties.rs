//! MQTT v5.0 PUBLISH properties
//!
//! Only the properties that may appear on a PUBLISH packet (Table 2-4,
//! "Used in PUBLISH"). Anything else on a PUBLISH is a malformed packet.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{
    read_binary, read_string, read_u16, read_u32, read_variable_int, variable_int_len,
    write_binary, write_string, write_variable_int,
};
use crate::protocol::{DecodeError, EncodeError};

/// Property identifiers valid on PUBLISH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    TopicAlias = 0x23,
    UserProperty = 0x26,
}

impl PropertyId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(PropertyId::PayloadFormatIndicator),
            0x02 => Some(PropertyId::MessageExpiryInterval),
            0x03 => Some(PropertyId::ContentType),
            0x08 => Some(PropertyId::ResponseTopic),
            0x09 => Some(PropertyId::CorrelationData),
            0x0B => Some(PropertyId::SubscriptionIdentifier),
            0x23 => Some(PropertyId::TopicAlias),
            0x26 => Some(PropertyId::UserProperty),
            _ => None,
        }
    }
}

/// Collection of PUBLISH properties
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub subscription_identifiers: Vec<u32>,
    pub topic_alias: Option<u16>,
    pub user_properties: Vec<(String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.payload_format_indicator.is_none()
            && self.message_expiry_interval.is_none()
            && self.content_type.is_none()
            && self.response_topic.is_none()
            && self.correlation_data.is_none()
            && self.subscription_identifiers.is_empty()
            && self.topic_alias.is_none()
            && self.user_properties.is_empty()
    }

    /// Drop the properties that only make sense for one hop (topic alias,
    /// subscription identifiers). Used before storing or re-routing.
    pub fn clear_client_specific(&mut self) {
        self.topic_alias = None;
        self.subscription_identifiers.clear();
    }

    /// Calculate the encoded size of properties (excluding the length prefix)
    pub fn encoded_size(&self) -> usize {
        let mut size = 0;

        if self.payload_format_indicator.is_some() {
            size += 2; // 1 byte id + 1 byte value
        }
        if self.message_expiry_interval.is_some() {
            size += 5; // 1 byte id + 4 bytes value
        }
        if let Some(ref s) = self.content_type {
            size += 1 + 2 + s.len();
        }
        if let Some(ref s) = self.response_topic {
            size += 1 + 2 + s.len();
        }
        if let Some(ref d) = self.correlation_data {
            size += 1 + 2 + d.len();
        }
        for id in &self.subscription_identifiers {
            size += 1 + variable_int_len(*id);
        }
        if self.topic_alias.is_some() {
            size += 3;
        }
        for (k, v) in &self.user_properties {
            size += 1 + 2 + k.len() + 2 + v.len();
        }

        size
    }

    /// Decode properties from buffer
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::InsufficientData);
        }

        // Read property length
        let (prop_len, len_bytes) = read_variable_int(buf)?;
        let end = len_bytes + prop_len as usize;

        if buf.len() < end {
            return Err(DecodeError::InsufficientData);
        }

        // Bound every read to the property block
        let block = &buf[..end];
        let mut props = Properties::new();
        let mut pos = len_bytes;

        while pos < end {
            let (prop_id, id_len) = read_variable_int(&block[pos..])?;
            pos += id_len;

            let prop_id = PropertyId::from_u8(prop_id as u8)
                .ok_or(DecodeError::InvalidPropertyId(prop_id as u8))?;
            let rest = &block[pos..];

            match prop_id {
                PropertyId::PayloadFormatIndicator => {
                    if props.payload_format_indicator.is_some() {
                        return Err(DecodeError::DuplicateProperty(prop_id as u8));
                    }
                    let v = *rest.first().ok_or(DecodeError::InsufficientData)?;
                    if v > 1 {
                        return Err(DecodeError::MalformedPacket(
                            "payload format indicator must be 0 or 1",
                        ));
                    }
                    props.payload_format_indicator = Some(v);
                    pos += 1;
                }
                PropertyId::MessageExpiryInterval => {
                    if props.message_expiry_interval.is_some() {
                        return Err(DecodeError::DuplicateProperty(prop_id as u8));
                    }
                    props.message_expiry_interval = Some(read_u32(rest)?);
                    pos += 4;
                }
                PropertyId::ContentType => {
                    if props.content_type.is_some() {
                        return Err(DecodeError::DuplicateProperty(prop_id as u8));
                    }
                    let (s, len) = read_string(rest)?;
                    props.content_type = Some(s.into());
                    pos += len;
                }
                PropertyId::ResponseTopic => {
                    if props.response_topic.is_some() {
                        return Err(DecodeError::DuplicateProperty(prop_id as u8));
                    }
                    let (s, len) = read_string(rest)?;
                    props.response_topic = Some(s.into());
                    pos += len;
                }
                PropertyId::CorrelationData => {
                    if props.correlation_data.is_some() {
                        return Err(DecodeError::DuplicateProperty(prop_id as u8));
                    }
                    let (data, len) = read_binary(rest)?;
                    props.correlation_data = Some(Bytes::copy_from_slice(data));
                    pos += len;
                }
                PropertyId::SubscriptionIdentifier => {
                    let (val, len) = read_variable_int(rest)?;
                    if val == 0 {
                        return Err(DecodeError::MalformedPacket(
                            "subscription identifier cannot be 0",
                        ));
                    }
                    props.subscription_identifiers.push(val);
                    pos += len;
                }
                PropertyId::TopicAlias => {
                    if props.topic_alias.is_some() {
                        return Err(DecodeError::DuplicateProperty(prop_id as u8));
                    }
                    let val = read_u16(rest)?;
                    if val == 0 {
                        return Err(DecodeError::MalformedPacket("topic alias cannot be 0"));
                    }
                    props.topic_alias = Some(val);
                    pos += 2;
                }
                PropertyId::UserProperty => {
                    let (key, key_len) = read_string(rest)?;
                    let (val, val_len) = read_string(&rest[key_len..])?;
                    props
                        .user_properties
                        .push((key.to_string(), val.to_string()));
                    pos += key_len + val_len;
                }
            }
        }

        Ok((props, end))
    }

    /// Encode properties to buffer
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let size = self.encoded_size();
        write_variable_int(buf, size as u32)?;

        if let Some(v) = self.payload_format_indicator {
            buf.put_u8(PropertyId::PayloadFormatIndicator as u8);
            buf.put_u8(v);
        }
        if let Some(v) = self.message_expiry_interval {
            buf.put_u8(PropertyId::MessageExpiryInterval as u8);
            buf.put_u32(v);
        }
        if let Some(ref s) = self.content_type {
            buf.put_u8(PropertyId::ContentType as u8);
            write_string(buf, s)?;
        }
        if let Some(ref s) = self.response_topic {
            buf.put_u8(PropertyId::ResponseTopic as u8);
            write_string(buf, s)?;
        }
        if let Some(ref d) = self.correlation_data {
            buf.put_u8(PropertyId::CorrelationData as u8);
            write_binary(buf, d)?;
        }
        for id in &self.subscription_identifiers {
            buf.put_u8(PropertyId::SubscriptionIdentifier as u8);
            write_variable_int(buf, *id)?;
        }
        if let Some(v) = self.topic_alias {
            buf.put_u8(PropertyId::TopicAlias as u8);
            buf.put_u16(v);
        }
        for (k, v) in &self.user_properties {
            buf.put_u8(PropertyId::UserProperty as u8);
            write_string(buf, k)?;
            write_string(buf, v)?;
        }

        Ok(())
    }
}
