//! Routing core behaviour through the public API
//!
//! Topic matching, subscription validation and the QoS delivery queue as a
//! broker worker would drive them.

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use vibemq_core::protocol::{Publish, QoS, ReasonCode};
use vibemq_core::session::{Qos2State, QosPublishQueue};
use vibemq_core::topic::{
    is_valid_utf8, parse_subscription_share, topic_matches_filter, validate_topic_filter,
    validate_topic_name, TopicMatcher,
};

#[test]
fn test_wildcard_matching() {
    let mut matcher = TopicMatcher::new();

    assert!(matcher.matches("a/+/c", "a/b/c"));
    assert!(!matcher.matches("a/+/c", "a/b/d/c"));
    assert!(matcher.matches("a/#", "a/b/c"));
    assert!(matcher.matches("a/#", "a"));
    assert!(!matcher.matches("a/#", "ab"));
    assert!(!matcher.matches("+/x", "$SYS/x"));
    assert!(matcher.matches("$SYS/+", "$SYS/x"));
}

#[test]
fn test_utf8_rejection() {
    // Overlong encoding of U+0000
    assert!(!is_valid_utf8(&[0xC0, 0x80], false));
    // Lone continuation byte
    assert!(!is_valid_utf8(&[0x80], false));
    // U+D800
    assert!(!is_valid_utf8(&[0xED, 0xA0, 0x80], false));
    assert!(is_valid_utf8("température/°C".as_bytes(), true));
}

#[test]
fn test_shared_subscription_parsing() {
    let filter = "$share/g1/a/b";
    let mut segments: Vec<&str> = filter.split('/').collect();
    let share = parse_subscription_share(&mut segments).unwrap();
    assert_eq!(share, Some("g1"));
    assert_eq!(segments.join("/"), "a/b");

    let mut segments = vec!["$share", "a+", "b"];
    let err = parse_subscription_share(&mut segments).unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::ProtocolError);

    assert_eq!(validate_topic_filter("$share/g1/a/#").unwrap(), Some("g1"));
    assert_eq!(validate_topic_filter("a/+/c").unwrap(), None);
}

#[test]
fn test_publish_topic_validation() {
    assert!(validate_topic_name("a/b").is_ok());
    assert_eq!(
        validate_topic_name("a/+").unwrap_err().reason_code(),
        ReasonCode::TopicNameInvalid
    );
    assert_eq!(
        validate_topic_filter("a/#/b").unwrap_err().reason_code(),
        ReasonCode::TopicFilterInvalid
    );
}

#[test]
fn test_route_into_session_queue() {
    let mut matcher = TopicMatcher::new();
    let mut queue = QosPublishQueue::new();

    let subscriptions = [("sensors/+/temp", QoS::ExactlyOnce), ("alerts/#", QoS::AtLeastOnce)];
    let mut incoming = vec![
        Publish::new("sensors/1/temp", "21", QoS::ExactlyOnce),
        Publish::new("sensors/1/humidity", "40", QoS::AtLeastOnce),
        Publish::new("alerts/fire", "!", QoS::ExactlyOnce),
    ];

    for publish in &mut incoming {
        for (filter, max_qos) in subscriptions {
            if matcher.matches_publish(filter, publish) {
                let id = queue.next_packet_id().unwrap();
                queue.enqueue_with_max_qos(publish, id, max_qos).unwrap();
            }
        }
    }

    let queued: Vec<_> = queue
        .iter()
        .map(|q| (q.packet_id(), q.publish().topic.to_string(), q.publish().qos))
        .collect();
    assert_eq!(
        queued,
        vec![
            (1, "sensors/1/temp".to_string(), QoS::ExactlyOnce),
            (2, "alerts/fire".to_string(), QoS::AtLeastOnce),
        ]
    );

    let footprints: usize = queue.iter().map(|q| q.footprint()).sum();
    assert_eq!(queue.byte_size(), footprints);

    // PUBREC for the QoS 2 message, then PUBCOMP
    assert!(queue.mark_released(1));
    assert_eq!(queue.iter().next().unwrap().qos2_state(), Some(Qos2State::WaitingPubComp));
    assert!(queue.remove(1).is_some());

    // PUBACK for the QoS 1 message
    assert!(queue.remove(2).is_some());
    assert!(queue.is_empty());
    assert_eq!(queue.byte_size(), 0);
}

#[test]
fn test_session_teardown_sweep() {
    let mut queue = QosPublishQueue::new();
    for id in 1..=5u16 {
        queue
            .enqueue(Publish::new(format!("t/{}", id), "xx", QoS::AtLeastOnce), id)
            .unwrap();
    }

    // Drop the even ids in one pass
    let mut cursor = queue.cursor_front();
    while let Some(entry) = cursor.current() {
        if entry.packet_id() % 2 == 0 {
            cursor.remove_current();
        } else {
            cursor.move_next();
        }
    }

    let left: Vec<u16> = queue.iter().map(|q| q.packet_id()).collect();
    assert_eq!(left, vec![1, 3, 5]);
    assert_eq!(queue.byte_size(), 3 * "t/1xx".len());

    let drained: Vec<u16> = queue.drain().map(|q| q.packet_id()).collect();
    assert_eq!(drained, vec![1, 3, 5]);
    assert_eq!(queue.byte_size(), 0);
}

proptest! {
    #[test]
    fn non_wildcard_filters_match_by_equality(
        filter in "[a-c/$]{0,10}",
        topic in "[a-c/$]{0,10}",
    ) {
        prop_assert_eq!(topic_matches_filter(&topic, &filter), filter == topic);
    }

    #[test]
    fn queue_bytes_track_contents(
        ops in proptest::collection::vec((1u16..20, any::<bool>(), "[a-z]{0,8}"), 0..60),
    ) {
        let mut queue = QosPublishQueue::new();
        for (id, insert, payload) in ops {
            if insert {
                let _ = queue.enqueue(Publish::new("t", payload, QoS::AtLeastOnce), id);
            } else {
                queue.remove(id);
            }
            let expected: usize = queue.iter().map(|q| q.footprint()).sum();
            prop_assert_eq!(queue.byte_size(), expected);
        }
    }
}
