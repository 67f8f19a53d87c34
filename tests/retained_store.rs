//! Retained message file tests
//!
//! Files are written both through `RetainedMessagesDb` and by hand with
//! `PersistenceFile`, so older and damaged layouts can be exercised.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use pretty_assertions::assert_eq;

use vibemq_core::codec::Encoder;
use vibemq_core::persistence::{
    Checkpointer, PersistenceError, PersistenceFile, RetainedDbVersion, RetainedMessagesDb,
    PLACEHOLDER_PACKET_ID, RESERVED_SPACE,
};
use vibemq_core::protocol::{Properties, ProtocolVersion, Publish, QoS};
use vibemq_core::retain::{RetainedMessage, RetainedTable};
use vibemq_core::topic::TopicMatcher;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn retained(topic: &str, payload: &str, qos: QoS, client: &str, user: &str) -> RetainedMessage {
    RetainedMessage::new(
        Publish::new(topic, payload.to_string(), qos)
            .with_retain(true)
            .with_origin(Some(client.into()), Some(user.into())),
    )
}

/// Append one message record the way the store lays it out
fn write_record(file: &mut PersistenceFile, publish: &Publish, age: Option<u32>, client: &str, user: &str) {
    let encoder = Encoder::new(ProtocolVersion::V5);
    let mut publish = publish.clone();
    if publish.qos != QoS::AtMostOnce {
        publish.packet_id = Some(PLACEHOLDER_PACKET_ID);
    }

    let mut buf = BytesMut::new();
    encoder.encode(&publish, &mut buf).unwrap();

    file.write_u16(encoder.fixed_header_len(&publish) as u16).unwrap();
    if let Some(age) = age {
        file.write_u32(age).unwrap();
    }
    file.write_u32(buf.len() as u32).unwrap();
    file.write_string(client).unwrap();
    file.write_string(user).unwrap();
    file.write_bytes(&buf).unwrap();
}

fn write_batch_header(file: &mut PersistenceFile, saved_at: Option<i64>, count: u32) {
    if let Some(saved_at) = saved_at {
        file.write_i64(saved_at).unwrap();
    }
    file.write_u32(count).unwrap();
    file.write_zeroes(RESERVED_SPACE).unwrap();
}

fn load(path: &Path) -> Result<Vec<RetainedMessage>, PersistenceError> {
    let mut db = RetainedMessagesDb::new(path);
    db.open_read()?;
    db.load()
}

#[test]
fn test_round_trip_preserves_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retained.db");

    let mut props = Properties::new();
    props.user_properties.push(("unit".into(), "celsius".into()));
    let saved = vec![
        retained("sensors/1/temp", "21.5", QoS::AtMostOnce, "sensor-1", "device"),
        retained("sensors/2/temp", "19.0", QoS::AtLeastOnce, "sensor-2", "device"),
        retained("$SYS/broker/version", "1.0", QoS::ExactlyOnce, "broker", ""),
        RetainedMessage::new(
            Publish::new("with/props", "x", QoS::AtLeastOnce)
                .with_retain(true)
                .with_properties(props),
        ),
    ];

    let mut db = RetainedMessagesDb::new(&path);
    db.open_write().unwrap();
    assert_eq!(db.save(&saved).unwrap(), saved.len());
    db.close_and_commit().unwrap();

    let loaded = load(&path).unwrap();
    assert_eq!(loaded.len(), saved.len());
    for (before, after) in saved.iter().zip(&loaded) {
        let (b, a) = (before.publish(), after.publish());
        assert_eq!(a.topic, b.topic);
        assert_eq!(a.payload, b.payload);
        assert_eq!(a.qos, b.qos);
        assert_eq!(a.client_id, b.client_id);
        assert_eq!(a.username, b.username);
        assert_eq!(a.properties, b.properties);
        assert!(a.age() <= b.age() + Duration::from_secs(2));
    }
    // An empty username is absent on both sides
    assert_eq!(saved[2].publish().username, None);
    assert_eq!(loaded[2].publish().username, None);
}

#[test]
fn test_file_starts_with_padded_magic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retained.db");

    RetainedMessagesDb::new(&path).save_all(&[]).unwrap();

    let raw = std::fs::read(&path).unwrap();
    let magic = RetainedDbVersion::V4.magic().as_bytes();
    assert_eq!(&raw[..magic.len()], magic);
    assert!(raw[magic.len()..32].iter().all(|&b| b == 0));
    // magic + saved_at + count + reserved
    assert_eq!(raw.len(), 32 + 8 + 4 + RESERVED_SPACE);
    assert_eq!(&raw[40..44], &[0, 0, 0, 0]);
}

#[test]
fn test_legacy_versions_load_empty() {
    let dir = tempfile::tempdir().unwrap();

    for version in [RetainedDbVersion::V1, RetainedDbVersion::V2] {
        let path = dir.path().join(format!("legacy-{}.db", version));
        let mut file = PersistenceFile::new(&path);
        file.open_write(version.magic()).unwrap();
        // Whatever follows is never interpreted
        file.write_bytes(&[0xFF; 17]).unwrap();
        file.close_and_commit().unwrap();

        let mut db = RetainedMessagesDb::new(&path);
        assert_eq!(db.open_read().unwrap(), version);
        assert!(db.load().unwrap().is_empty());
    }
}

#[test]
fn test_unknown_magic_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("other.db");

    let mut file = PersistenceFile::new(&path);
    file.open_write("SomethingElseDBv1").unwrap();
    file.close_and_commit().unwrap();

    let mut db = RetainedMessagesDb::new(&path);
    match db.open_read() {
        Err(PersistenceError::UnknownVersion(magic)) => assert_eq!(magic, "SomethingElseDBv1"),
        other => panic!("expected UnknownVersion, got {:?}", other),
    }
}

#[test]
fn test_v3_file_loads_without_age() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v3.db");

    let publish = Publish::new("old/format", "v3", QoS::AtLeastOnce).with_retain(true);
    let mut file = PersistenceFile::new(&path);
    file.open_write(RetainedDbVersion::V3.magic()).unwrap();
    write_batch_header(&mut file, None, 1);
    write_record(&mut file, &publish, None, "legacy-client", "bob");
    write_batch_header(&mut file, None, 0);
    file.close_and_commit().unwrap();

    let loaded = load(&path).unwrap();
    assert_eq!(loaded.len(), 1);
    let p = loaded[0].publish();
    assert_eq!(&*p.topic, "old/format");
    assert_eq!(p.qos, QoS::AtLeastOnce);
    assert_eq!(p.packet_id, None);
    assert_eq!(p.client_id.as_deref(), Some("legacy-client"));
    assert_eq!(p.username.as_deref(), Some("bob"));
    assert!(p.age() < Duration::from_secs(2));
}

#[test]
fn test_v4_age_adds_time_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aged.db");

    let publish = Publish::new("aged", "x", QoS::AtMostOnce).with_retain(true);
    let mut file = PersistenceFile::new(&path);
    file.open_write(RetainedDbVersion::V4.magic()).unwrap();
    // Saved an hour ago, message was ten minutes old then
    write_batch_header(&mut file, Some(unix_now() - 3600), 1);
    write_record(&mut file, &publish, Some(600), "c", "u");
    // Timestamp from the future counts as no time on disk
    write_batch_header(&mut file, Some(unix_now() + 3600), 1);
    write_record(&mut file, &publish, Some(5), "c", "u");
    file.close_and_commit().unwrap();

    let loaded = load(&path).unwrap();
    assert_eq!(loaded.len(), 2);

    let age = loaded[0].publish().age().as_secs();
    assert!((4200..=4202).contains(&age), "age {}", age);
    let age = loaded[1].publish().age().as_secs();
    assert!((5..=7).contains(&age), "age {}", age);
}

#[test]
fn test_expired_while_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("expiry.db");

    let mut props = Properties::new();
    props.message_expiry_interval = Some(60);
    let publish = Publish::new("short/lived", "x", QoS::AtMostOnce)
        .with_retain(true)
        .with_properties(props);

    let mut file = PersistenceFile::new(&path);
    file.open_write(RetainedDbVersion::V4.magic()).unwrap();
    write_batch_header(&mut file, Some(unix_now() - 120), 1);
    write_record(&mut file, &publish, Some(0), "c", "u");
    file.close_and_commit().unwrap();

    let loaded = load(&path).unwrap();
    assert!(loaded[0].publish().has_expired());

    // The table refuses to resurrect it
    let table = RetainedTable::new();
    assert_eq!(table.load_from(loaded), 0);
    assert!(table.is_empty());
}

#[test]
fn test_truncated_batch_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.db");

    let publish = Publish::new("a", "b", QoS::AtMostOnce);
    let mut file = PersistenceFile::new(&path);
    file.open_write(RetainedDbVersion::V4.magic()).unwrap();
    write_batch_header(&mut file, Some(unix_now()), 2);
    write_record(&mut file, &publish, Some(0), "c", "u");
    file.close_and_commit().unwrap();

    assert!(matches!(load(&path), Err(PersistenceError::Corruption(_))));
}

#[test]
fn test_truncated_packet_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short-packet.db");

    let mut file = PersistenceFile::new(&path);
    file.open_write(RetainedDbVersion::V4.magic()).unwrap();
    write_batch_header(&mut file, Some(unix_now()), 1);
    file.write_u16(2).unwrap();
    file.write_u32(0).unwrap();
    file.write_u32(500).unwrap();
    file.write_string("c").unwrap();
    file.write_string("u").unwrap();
    file.write_bytes(&[0x30, 0x05]).unwrap();
    file.close_and_commit().unwrap();

    assert!(matches!(load(&path), Err(PersistenceError::Corruption(_))));
}

#[test]
fn test_garbage_packet_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.db");

    let mut file = PersistenceFile::new(&path);
    file.open_write(RetainedDbVersion::V4.magic()).unwrap();
    write_batch_header(&mut file, Some(unix_now()), 1);
    file.write_u16(2).unwrap();
    file.write_u32(0).unwrap();
    file.write_u32(3).unwrap();
    file.write_string("").unwrap();
    file.write_string("").unwrap();
    // CONNECT packet type, not a PUBLISH
    file.write_bytes(&[0x10, 0x01, 0x00]).unwrap();
    file.close_and_commit().unwrap();

    assert!(matches!(load(&path), Err(PersistenceError::Decode(_))));
}

#[test]
fn test_oversized_file_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retained.db");

    let messages: Vec<_> = (0..10)
        .map(|i| retained(&format!("t/{}", i), "payload", QoS::AtMostOnce, "c", "u"))
        .collect();
    RetainedMessagesDb::new(&path).save_all(&messages).unwrap();

    let mut db = RetainedMessagesDb::new(&path).with_max_file_size(64);
    assert!(matches!(db.open_read(), Err(PersistenceError::TooLarge { .. })));
}

#[test]
fn test_save_always_writes_current_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upgrade.db");

    let publish = Publish::new("from/v3", "x", QoS::ExactlyOnce).with_retain(true);
    let mut file = PersistenceFile::new(&path);
    file.open_write(RetainedDbVersion::V3.magic()).unwrap();
    write_batch_header(&mut file, None, 1);
    write_record(&mut file, &publish, None, "c", "u");
    file.close_and_commit().unwrap();

    let messages = load(&path).unwrap();
    RetainedMessagesDb::new(&path).save_all(&messages).unwrap();

    let mut db = RetainedMessagesDb::new(&path);
    assert_eq!(db.open_read().unwrap(), RetainedDbVersion::CURRENT);
    let reloaded = db.load().unwrap();
    assert_eq!(&**reloaded[0].topic(), "from/v3");
    assert_eq!(reloaded[0].publish().qos, QoS::ExactlyOnce);
}

#[test]
fn test_restart_restores_retained_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retained.db");

    let table = Arc::new(RetainedTable::new());
    table.set(Publish::new("home/kitchen/temp", "22", QoS::AtLeastOnce).with_retain(true));
    table.set(Publish::new("home/garage/door", "open", QoS::ExactlyOnce).with_retain(true));
    table.set(Publish::new("office/temp", "20", QoS::AtMostOnce).with_retain(true));
    // Empty payload deletes
    table.set(Publish::new("office/temp", "", QoS::AtMostOnce).with_retain(true));

    Checkpointer::new(RetainedMessagesDb::new(&path), table)
        .save()
        .unwrap();

    let restored = Arc::new(RetainedTable::new());
    let checkpointer = Checkpointer::new(RetainedMessagesDb::new(&path), restored.clone());
    assert_eq!(checkpointer.load().unwrap(), 2);

    let mut matcher = TopicMatcher::new();
    let mut delivered = restored.matching("home/+/#", QoS::AtLeastOnce, &mut matcher);
    delivered.sort_by(|a, b| a.topic.cmp(&b.topic));

    let topics: Vec<_> = delivered.iter().map(|p| &*p.topic).collect();
    assert_eq!(topics, vec!["home/garage/door", "home/kitchen/temp"]);
    assert!(delivered.iter().all(|p| p.retain));
    // Capped at the subscription QoS
    assert_eq!(delivered[0].qos, QoS::AtLeastOnce);
}
