//! Topic name, topic filter and share name validation
//!
//! Key rules:
//! - Topic names MUST NOT contain wildcards (+ or #)
//! - Multi-level wildcard (#) must be the last character and preceded by / (or be the whole filter)
//! - Single-level wildcard (+) must occupy an entire level
//! - Strings are UTF-8 without control characters, surrogates or noncharacters [MQTT-1.5.4]
//! - `$share/<name>/<filter>` carries a share name that is not part of the filter

use crate::protocol::{ProtocolError, ReasonCode};

/// Maximum length of an MQTT UTF-8 string
pub const MAX_TOPIC_LEN: usize = 65535;

/// First segment of a shared subscription filter
pub const SHARE_PREFIX: &str = "$share";

const INVALID_SHARE_NAME: ProtocolError =
    ProtocolError::new("invalid character in share name", ReasonCode::ProtocolError);
const INCOMPLETE_SHARE: ProtocolError = ProtocolError::new(
    "shared subscription needs a share name and a filter",
    ReasonCode::ProtocolError,
);

/// Validate MQTT UTF-8 by hand.
///
/// Single pass, no backtracking. Rejects malformed sequences, overlong
/// encodings, code points above U+10FFFF, U+0000..=U+001F, U+007F..=U+009F,
/// surrogates and Unicode noncharacters. With `check_publish_chars` the
/// wildcard bytes `#` and `+` are rejected too.
pub fn is_valid_utf8(bytes: &[u8], check_publish_chars: bool) -> bool {
    let mut remaining = 0u32;
    let mut char_len = 0u32;
    let mut code_point = 0u32;

    for &b in bytes {
        if check_publish_chars && (b == b'#' || b == b'+') {
            return false;
        }

        if remaining == 0 {
            (code_point, remaining) = if b & 0x80 == 0 {
                (b as u32, 0)
            } else if b & 0xE0 == 0xC0 {
                (((b & 0x1F) as u32) << 6, 1)
            } else if b & 0xF0 == 0xE0 {
                (((b & 0x0F) as u32) << 12, 2)
            } else if b & 0xF8 == 0xF0 {
                (((b & 0x07) as u32) << 18, 3)
            } else {
                // stray continuation byte or 5/6 byte lead
                return false;
            };
            char_len = remaining + 1;
        } else {
            if b & 0xC0 != 0x80 {
                return false;
            }
            remaining -= 1;
            code_point |= ((b & 0x3F) as u32) << (6 * remaining);
        }

        if remaining == 0 && !is_acceptable_code_point(code_point, char_len) {
            return false;
        }
    }

    remaining == 0
}

#[inline]
fn is_acceptable_code_point(cp: u32, char_len: u32) -> bool {
    let overlong = match char_len {
        2 => cp < 0x80,
        3 => cp < 0x800,
        4 => cp < 0x1_0000,
        _ => false,
    };
    if overlong || cp > 0x10_FFFF {
        return false;
    }

    if cp <= 0x1F || (0x7F..=0x9F).contains(&cp) {
        return false;
    }

    if char_len > 1 {
        if (0xD800..=0xDFFF).contains(&cp) || (0xFDD0..=0xFDEF).contains(&cp) {
            return false;
        }
        // last two code points of every plane
        if cp & 0xFFFE == 0xFFFE {
            return false;
        }
    }

    true
}

/// A publish topic: non-empty, no wildcard characters anywhere
pub fn is_valid_publish_path(topic: &str) -> bool {
    !topic.is_empty() && !topic.bytes().any(|c| c == b'#' || c == b'+')
}

/// A subscribe filter with wildcards only in legal positions
pub fn is_valid_subscribe_path(filter: &str) -> bool {
    let bytes = filter.as_bytes();
    if bytes.is_empty() {
        return false;
    }

    for (i, &c) in bytes.iter().enumerate() {
        let level_start = i == 0 || bytes[i - 1] == b'/';
        let last = i + 1 == bytes.len();
        match c {
            b'+' if !level_start || !(last || bytes[i + 1] == b'/') => return false,
            b'#' if !level_start || !last => return false,
            _ => {}
        }
    }

    true
}

/// A share name: non-empty, none of `#`, `+`, `/`
pub fn is_valid_share_name(name: &str) -> bool {
    !name.is_empty() && !name.bytes().any(|c| matches!(c, b'#' | b'+' | b'/'))
}

/// Extract the share name from a split subscribe filter.
///
/// When the first segment is `$share` the share name segment is validated
/// and both leading segments are removed in place, leaving only the filter
/// used for matching. Ordinary filters are left untouched and yield `None`.
pub fn parse_subscription_share<'a>(
    segments: &mut Vec<&'a str>,
) -> Result<Option<&'a str>, ProtocolError> {
    if segments.first() != Some(&SHARE_PREFIX) {
        return Ok(None);
    }
    if segments.len() < 3 {
        return Err(INCOMPLETE_SHARE);
    }

    let share_name = segments[1];
    if !is_valid_share_name(share_name) {
        return Err(INVALID_SHARE_NAME);
    }

    segments.drain(..2);
    Ok(Some(share_name))
}

/// Validate a topic name (used in PUBLISH)
pub fn validate_topic_name(topic: &str) -> Result<(), ProtocolError> {
    if topic.is_empty() {
        return Err(ProtocolError::new(
            "topic name cannot be empty",
            ReasonCode::TopicNameInvalid,
        ));
    }

    if topic.len() > MAX_TOPIC_LEN {
        return Err(ProtocolError::new(
            "topic name exceeds maximum length",
            ReasonCode::TopicNameInvalid,
        ));
    }

    if !is_valid_utf8(topic.as_bytes(), true) {
        return Err(ProtocolError::new(
            "topic name contains invalid characters",
            ReasonCode::TopicNameInvalid,
        ));
    }

    Ok(())
}

/// Validate a topic filter (used in SUBSCRIBE/UNSUBSCRIBE)
///
/// Returns the share name for `$share/<name>/<filter>` subscriptions.
pub fn validate_topic_filter(filter: &str) -> Result<Option<&str>, ProtocolError> {
    if filter.is_empty() {
        return Err(ProtocolError::new(
            "topic filter cannot be empty",
            ReasonCode::TopicFilterInvalid,
        ));
    }

    if filter.len() > MAX_TOPIC_LEN {
        return Err(ProtocolError::new(
            "topic filter exceeds maximum length",
            ReasonCode::TopicFilterInvalid,
        ));
    }

    if !is_valid_utf8(filter.as_bytes(), false) {
        return Err(ProtocolError::new(
            "topic filter contains invalid characters",
            ReasonCode::TopicFilterInvalid,
        ));
    }

    let mut segments: Vec<&str> = filter.split('/').collect();
    let share_name = parse_subscription_share(&mut segments)?;

    let valid = match share_name {
        // The remaining filter is a suffix of the original string
        Some(name) => {
            let rest = &filter[SHARE_PREFIX.len() + 1 + name.len() + 1..];
            is_valid_subscribe_path(rest)
        }
        None => is_valid_subscribe_path(filter),
    };

    if !valid {
        return Err(ProtocolError::new(
            "wildcard in invalid position",
            ReasonCode::TopicFilterInvalid,
        ));
    }

    Ok(share_name)
}
