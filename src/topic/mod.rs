//! Topic matching and validation
//!
//! Implements topic name/filter validation, shared subscription parsing and
//! wildcard matching as defined in section 4.7 of MQTT v3.1.1 and v5.0.
//!
//! Performance notes:
//! - Filters without wildcards are matched by plain equality, no splitting
//! - Splitting writes byte ranges into scratch buffers owned by a [`TopicMatcher`]
//! - The separator scan is vectorized when the CPU allows it

mod matcher;
pub mod splitter;
pub mod validation;

pub use matcher::{topic_matches_filter, TopicMatcher};
pub use splitter::{MemchrSplitter, PortableSplitter, SegmentSplitter};
pub use validation::{
    is_valid_publish_path, is_valid_share_name, is_valid_subscribe_path, is_valid_utf8,
    parse_subscription_share, validate_topic_filter, validate_topic_name,
};
