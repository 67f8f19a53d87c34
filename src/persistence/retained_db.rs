//! Retained message database
//!
//! File layout, current version (v4):
//!
//! ```text
//! magic                 32 bytes, "VibeMQRetainedDBv4" zero padded
//! repeated batch:
//!   saved_at            i64, seconds since the Unix epoch     (v4 only)
//!   count               u32
//!   reserved            64 zero bytes
//!   repeated count times:
//!     fixed_header_len  u16
//!     age               u32, seconds                          (v4 only)
//!     packet_len        u32
//!     client_id         u32 length + UTF-8
//!     username          u32 length + UTF-8
//!     packet            packet_len bytes, MQTT 5 PUBLISH
//! ```
//!
//! Each [`RetainedMessagesDb::save`] call appends one batch. Reading stops
//! cleanly at end of file on a batch boundary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use tracing::{debug, warn};

use super::error::{PersistenceError, Result};
use super::file::{required, PersistenceFile};
use crate::codec::{Decoder, Encoder};
use crate::metrics;
use crate::protocol::{ProtocolVersion, QoS};
use crate::retain::RetainedMessage;

/// Zeroed space after each batch header
pub const RESERVED_SPACE: usize = 64;

/// Stand-in packet id so QoS > 0 publishes encode; dropped again on load
pub const PLACEHOLDER_PACKET_ID: u16 = 666;

/// Known retained database formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RetainedDbVersion {
    V1,
    V2,
    V3,
    V4,
}

impl RetainedDbVersion {
    pub const CURRENT: Self = Self::V4;

    pub fn magic(self) -> &'static str {
        match self {
            Self::V1 => "VibeMQRetainedDBv1",
            Self::V2 => "VibeMQRetainedDBv2",
            Self::V3 => "VibeMQRetainedDBv3",
            Self::V4 => "VibeMQRetainedDBv4",
        }
    }

    pub fn from_magic(magic: &str) -> Option<Self> {
        [Self::V1, Self::V2, Self::V3, Self::V4]
            .into_iter()
            .find(|v| v.magic() == magic)
    }

    /// Development formats that were never finalized and are not read
    pub fn is_legacy(self) -> bool {
        matches!(self, Self::V1 | Self::V2)
    }

    /// Whether batches carry a saved-at timestamp and messages their age
    fn has_age(self) -> bool {
        self >= Self::V4
    }
}

impl std::fmt::Display for RetainedDbVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let n = match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
            Self::V4 => 4,
        };
        write!(f, "v{}", n)
    }
}

/// Reads and writes the retained message table
#[derive(Debug)]
pub struct RetainedMessagesDb {
    file: PersistenceFile,
    version: Option<RetainedDbVersion>,
    encoder: Encoder,
    decoder: Decoder,
}

impl RetainedMessagesDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: PersistenceFile::new(path),
            version: None,
            encoder: Encoder::new(ProtocolVersion::V5),
            decoder: Decoder::new(ProtocolVersion::V5),
        }
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.file = self.file.with_max_file_size(max);
        self
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Version of the open file, `None` when closed
    pub fn version(&self) -> Option<RetainedDbVersion> {
        self.version
    }

    /// Start writing a new file in the current format
    pub fn open_write(&mut self) -> Result<()> {
        self.file.open_write(RetainedDbVersion::CURRENT.magic())?;
        self.version = Some(RetainedDbVersion::CURRENT);
        Ok(())
    }

    /// Open an existing file and detect its version.
    ///
    /// An unknown magic string is a [`PersistenceError::UnknownVersion`].
    pub fn open_read(&mut self) -> Result<RetainedDbVersion> {
        self.version = None;
        self.file.open_read()?;

        let magic = self.file.version_tag().unwrap_or_default();
        match RetainedDbVersion::from_magic(magic) {
            Some(version) => {
                self.version = Some(version);
                Ok(version)
            }
            None => {
                let magic = magic.to_string();
                self.close();
                Err(PersistenceError::UnknownVersion(magic))
            }
        }
    }

    /// Append one batch holding `messages`. Returns how many were written.
    pub fn save(&mut self, messages: &[RetainedMessage]) -> Result<usize> {
        if !self.file.is_writing() {
            return Err(PersistenceError::NotOpen);
        }

        let count = u32::try_from(messages.len())
            .map_err(|_| PersistenceError::Limit("retained message count"))?;

        let saved_at = unix_now();
        debug!(saved_at, count, "Saving current time stamp");
        self.file.write_i64(saved_at)?;
        self.file.write_u32(count)?;
        self.file.write_zeroes(RESERVED_SPACE)?;

        let mut buf = BytesMut::new();
        for message in messages {
            let mut publish = message.publish().lightweight_clone();
            publish.dup = false;
            publish.packet_id = match publish.qos {
                QoS::AtMostOnce => None,
                _ => Some(PLACEHOLDER_PACKET_ID),
            };

            buf.clear();
            self.encoder.encode(&publish, &mut buf)?;

            let header_len = u16::try_from(self.encoder.fixed_header_len(&publish))
                .map_err(|_| PersistenceError::Limit("fixed header length"))?;
            let packet_len =
                u32::try_from(buf.len()).map_err(|_| PersistenceError::Limit("packet length"))?;
            let age = u32::try_from(publish.age().as_secs()).unwrap_or(u32::MAX);

            debug!(
                topic = %publish.topic,
                qos = ?publish.qos,
                age,
                "Saving retained message"
            );

            self.file.write_u16(header_len)?;
            self.file.write_u32(age)?;
            self.file.write_u32(packet_len)?;
            self.file.write_string(publish.client_id.as_deref().unwrap_or_default())?;
            self.file.write_string(publish.username.as_deref().unwrap_or_default())?;
            self.file.write_bytes(&buf)?;
        }

        if let Some(m) = metrics::global() {
            m.retained_messages_saved.inc_by(messages.len() as u64);
        }
        Ok(messages.len())
    }

    /// Read every batch in the file.
    ///
    /// Legacy v1/v2 files are not read: a warning is logged and the result is empty.
    pub fn load(&mut self) -> Result<Vec<RetainedMessage>> {
        let version = match self.version {
            Some(v) if self.file.is_reading() => v,
            _ => return Err(PersistenceError::NotOpen),
        };

        if version.is_legacy() {
            warn!(
                "File '{}' is version {}, an internal development version that was never finalized. Not reading.",
                self.file.path().display(),
                version
            );
            return Ok(Vec::new());
        }

        let now = unix_now();
        let mut messages = Vec::new();

        loop {
            let persistence_age = if version.has_age() {
                let Some(saved_at) = self.file.read_i64()? else {
                    break;
                };
                now.saturating_sub(saved_at).max(0) as u64
            } else {
                0
            };

            let count = match self.file.read_u32()? {
                Some(count) => count,
                None if version.has_age() => {
                    return Err(PersistenceError::Corruption(
                        "unexpected end of file reading message count".to_string(),
                    ))
                }
                None => break,
            };
            self.load_batch(version, count, persistence_age, &mut messages)?;
        }

        if let Some(m) = metrics::global() {
            m.retained_messages_loaded.inc_by(messages.len() as u64);
        }
        Ok(messages)
    }

    fn load_batch(
        &mut self,
        version: RetainedDbVersion,
        count: u32,
        persistence_age: u64,
        messages: &mut Vec<RetainedMessage>,
    ) -> Result<()> {
        self.file.skip(RESERVED_SPACE)?;

        for _ in 0..count {
            let header_len = required(self.file.read_u16()?, "fixed header length")?;
            let original_age = if version.has_age() {
                required(self.file.read_u32()?, "message age")?
            } else {
                0
            };
            let packet_len = required(self.file.read_u32()?, "packet length")?;
            let client_id = self.file.read_string()?;
            let username = self.file.read_string()?;
            let packet = self.file.read_bytes(packet_len as usize)?;

            let mut publish = self
                .decoder
                .decode_with_header_len(&packet, header_len as usize)?;
            publish.packet_id = None;
            publish.client_id = non_empty(client_id);
            publish.username = non_empty(username);

            let age = Duration::from_secs(persistence_age + u64::from(original_age));
            publish.backdate(age);

            debug!(
                topic = %publish.topic,
                qos = ?publish.qos,
                age = age.as_secs(),
                "Loading retained message"
            );
            messages.push(RetainedMessage::new(publish));
        }
        Ok(())
    }

    /// Commit a file being written, or close one being read
    pub fn close_and_commit(&mut self) -> Result<()> {
        self.version = None;
        self.file.close_and_commit()
    }

    /// Close without committing any pending write
    pub fn close(&mut self) {
        self.version = None;
        self.file.discard();
    }

    /// Write `messages` as a single batch and commit the file
    pub fn save_all(&mut self, messages: &[RetainedMessage]) -> Result<usize> {
        self.open_write()?;
        match self.save(messages) {
            Ok(n) => {
                self.close_and_commit()?;
                Ok(n)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Read the whole file. A missing file loads as empty.
    pub fn load_all(&mut self) -> Result<Vec<RetainedMessage>> {
        if !self.path().exists() {
            debug!(path = %self.path().display(), "No retained message file to load");
            return Ok(Vec::new());
        }

        self.open_read()?;
        let result = self.load();
        self.close();
        result
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn non_empty(s: String) -> Option<Arc<str>> {
    (!s.is_empty()).then(|| Arc::from(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Properties, Publish};
    use pretty_assertions::assert_eq;

    fn retained(topic: &str, payload: &str, qos: QoS) -> RetainedMessage {
        RetainedMessage::new(
            Publish::new(topic, payload.to_string(), qos)
                .with_retain(true)
                .with_origin(Some("client-1".into()), Some("alice".into())),
        )
    }

    #[test]
    fn test_version_magic() {
        for v in [
            RetainedDbVersion::V1,
            RetainedDbVersion::V2,
            RetainedDbVersion::V3,
            RetainedDbVersion::V4,
        ] {
            assert_eq!(RetainedDbVersion::from_magic(v.magic()), Some(v));
        }
        assert_eq!(RetainedDbVersion::from_magic("VibeMQRetainedDBv5"), None);
        assert!(RetainedDbVersion::V2.is_legacy());
        assert!(!RetainedDbVersion::V3.is_legacy());
        assert_eq!(RetainedDbVersion::CURRENT.to_string(), "v4");
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retained.db");

        let mut props = Properties::new();
        props.content_type = Some("text/plain".into());
        let with_props = RetainedMessage::new(
            Publish::new("a/props", "p", QoS::ExactlyOnce)
                .with_retain(true)
                .with_properties(props),
        );
        let saved = vec![
            retained("a/b", "one", QoS::AtMostOnce),
            retained("a/c", "two", QoS::AtLeastOnce),
            with_props,
        ];

        let mut db = RetainedMessagesDb::new(&path);
        assert_eq!(db.save_all(&saved).unwrap(), 3);

        let mut db = RetainedMessagesDb::new(&path);
        let loaded = db.load_all().unwrap();
        assert_eq!(loaded.len(), 3);

        for (before, after) in saved.iter().zip(&loaded) {
            let (b, a) = (before.publish(), after.publish());
            assert_eq!(a.topic, b.topic);
            assert_eq!(a.payload, b.payload);
            assert_eq!(a.qos, b.qos);
            assert_eq!(a.client_id, b.client_id);
            assert_eq!(a.username, b.username);
            assert_eq!(a.packet_id, None);
            assert!(a.retain);
            assert!(a.age() < Duration::from_secs(3));
        }
        assert_eq!(loaded[2].publish().properties.content_type.as_deref(), Some("text/plain"));
        assert_eq!(loaded[0].publish().client_id.as_deref(), Some("client-1"));
    }

    #[test]
    fn test_missing_origin_round_trips_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retained.db");

        let message = RetainedMessage::new(Publish::new("t", "x", QoS::AtMostOnce));
        RetainedMessagesDb::new(&path).save_all(&[message]).unwrap();

        let loaded = RetainedMessagesDb::new(&path).load_all().unwrap();
        assert_eq!(loaded[0].publish().client_id, None);
        assert_eq!(loaded[0].publish().username, None);
    }

    #[test]
    fn test_empty_origin_round_trips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retained.db");

        let message = RetainedMessage::new(
            Publish::new("t", "x", QoS::AtLeastOnce).with_origin(Some("".into()), Some("".into())),
        );
        RetainedMessagesDb::new(&path)
            .save_all(std::slice::from_ref(&message))
            .unwrap();

        let loaded = RetainedMessagesDb::new(&path).load_all().unwrap();
        assert_eq!(loaded[0].publish().client_id, message.publish().client_id);
        assert_eq!(loaded[0].publish().username, message.publish().username);
        assert_eq!(loaded[0].publish().client_id, None);
    }

    #[test]
    fn test_age_is_carried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retained.db");

        let mut publish = Publish::new("aged", "x", QoS::AtMostOnce);
        publish.backdate(Duration::from_secs(120));
        RetainedMessagesDb::new(&path)
            .save_all(&[RetainedMessage::new(publish)])
            .unwrap();

        let loaded = RetainedMessagesDb::new(&path).load_all().unwrap();
        let age = loaded[0].publish().age().as_secs();
        assert!((120..=122).contains(&age), "age {}", age);
    }

    #[test]
    fn test_expiry_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retained.db");

        let mut props = Properties::new();
        props.message_expiry_interval = Some(100);
        let mut publish = Publish::new("exp", "x", QoS::AtMostOnce).with_properties(props);
        publish.backdate(Duration::from_secs(90));
        RetainedMessagesDb::new(&path)
            .save_all(&[RetainedMessage::new(publish)])
            .unwrap();

        let loaded = RetainedMessagesDb::new(&path).load_all().unwrap();
        let left = loaded[0].publish().remaining_expiry().unwrap();
        assert!(left <= Duration::from_secs(10));
        assert!(!loaded[0].publish().has_expired());
    }

    #[test]
    fn test_save_requires_open_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = RetainedMessagesDb::new(dir.path().join("r.db"));
        assert!(matches!(db.save(&[]), Err(PersistenceError::NotOpen)));
        assert!(matches!(db.load(), Err(PersistenceError::NotOpen)));
    }

    #[test]
    fn test_multiple_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retained.db");

        let mut db = RetainedMessagesDb::new(&path);
        db.open_write().unwrap();
        db.save(&[retained("one", "1", QoS::AtMostOnce)]).unwrap();
        db.save(&[]).unwrap();
        db.save(&[
            retained("two", "2", QoS::AtLeastOnce),
            retained("three", "3", QoS::ExactlyOnce),
        ])
        .unwrap();
        db.close_and_commit().unwrap();

        let mut db = RetainedMessagesDb::new(&path);
        assert_eq!(db.open_read().unwrap(), RetainedDbVersion::V4);
        let topics: Vec<_> = db
            .load()
            .unwrap()
            .iter()
            .map(|m| m.topic().to_string())
            .collect();
        assert_eq!(topics, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = RetainedMessagesDb::new(dir.path().join("absent.db"));
        assert!(db.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retained.db");
        RetainedMessagesDb::new(&path)
            .save_all(&[retained("keep", "k", QoS::AtMostOnce)])
            .unwrap();

        // Topic too long for the wire format
        let huge = RetainedMessage::new(Publish::new("x".repeat(70_000), "v", QoS::AtMostOnce));
        assert!(matches!(
            RetainedMessagesDb::new(&path).save_all(&[huge]),
            Err(PersistenceError::Encode(_))
        ));

        let loaded = RetainedMessagesDb::new(&path).load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(&**loaded[0].topic(), "keep");
    }
}
