//! MQTT Session state owned by the routing core
//!
//! A session is pinned to one worker for its lifetime, so everything here is
//! plain owned data without internal locking. The outgoing QoS 1/2 queue is
//! the record of "sent but not yet fully acknowledged" work.

mod qos_queue;

pub use qos_queue::{Cursor, Qos2State, QosPublishQueue, QueuedPublish};
