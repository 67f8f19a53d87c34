//! VibeMQ core - message routing building blocks of the VibeMQ broker
//!
//! Topic matching and validation, the per-session QoS 1/2 delivery queue,
//! and durable, versioned persistence of retained messages.

pub mod codec;
pub mod config;
pub mod metrics;
pub mod persistence;
pub mod protocol;
pub mod retain;
pub mod session;
pub mod topic;

pub use config::Config;
pub use metrics::Metrics;
pub use persistence::{Checkpointer, PersistenceError, RetainedDbVersion, RetainedMessagesDb};
pub use protocol::{ProtocolVersion, Publish, QoS};
pub use retain::{RetainMode, RetainedMessage, RetainedTable};
pub use session::QosPublishQueue;
pub use topic::{topic_matches_filter, TopicMatcher};
