//! Topic filter matching
//!
//! Matching rules:
//! - / is the level separator
//! - + matches exactly one level
//! - # matches zero or more levels (validated as last at subscribe time)
//! - $-topics only match filters that start with $ as well

use std::ops::Range;

use super::splitter::{self, SegmentSplitter};
use crate::protocol::Publish;

/// Matches topics against filters using caller-owned scratch buffers.
///
/// One matcher belongs to one worker; the scratch vectors are cleared and
/// reused on every call so the hot path does not allocate once they have
/// grown to the deepest topic seen.
pub struct TopicMatcher {
    splitter: &'static dyn SegmentSplitter,
    filter_parts: Vec<Range<usize>>,
    topic_parts: Vec<Range<usize>>,
}

impl TopicMatcher {
    /// Matcher using the splitter picked by the CPU probe
    pub fn new() -> Self {
        Self::with_splitter(splitter::detect())
    }

    pub fn with_splitter(splitter: &'static dyn SegmentSplitter) -> Self {
        Self {
            splitter,
            filter_parts: Vec::with_capacity(16),
            topic_parts: Vec::with_capacity(16),
        }
    }

    pub fn splitter(&self) -> &'static dyn SegmentSplitter {
        self.splitter
    }

    /// Check if a topic filter matches a topic name
    pub fn matches(&mut self, filter: &str, topic: &str) -> bool {
        if !has_wildcard(filter) {
            return filter == topic;
        }

        if is_reserved(topic) && !is_reserved(filter) {
            return false;
        }

        self.splitter.split(filter, &mut self.filter_parts);
        self.splitter.split(topic, &mut self.topic_parts);
        walk(filter, &self.filter_parts, topic, &self.topic_parts)
    }

    /// Like [`TopicMatcher::matches`], reusing the publish's cached topic split
    pub fn matches_publish(&mut self, filter: &str, publish: &mut Publish) -> bool {
        if !has_wildcard(filter) {
            return filter == &*publish.topic;
        }

        if is_reserved(&publish.topic) && !is_reserved(filter) {
            return false;
        }

        let topic_parts = publish.segments(self.splitter);
        self.splitter.split(filter, &mut self.filter_parts);
        walk(filter, &self.filter_parts, &publish.topic, &topic_parts)
    }
}

impl Default for TopicMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TopicMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicMatcher")
            .field("splitter", &self.splitter.name())
            .finish_non_exhaustive()
    }
}

/// One-off match with a temporary matcher.
///
/// Allocates scratch space on every call; long-lived callers should keep a
/// [`TopicMatcher`] instead.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    TopicMatcher::with_splitter(splitter::portable()).matches(filter, topic)
}

#[inline]
fn has_wildcard(filter: &str) -> bool {
    filter.bytes().any(|b| b == b'+' || b == b'#')
}

#[inline]
fn is_reserved(s: &str) -> bool {
    s.as_bytes().first() == Some(&b'$')
}

fn walk(
    filter: &str,
    filter_parts: &[Range<usize>],
    topic: &str,
    topic_parts: &[Range<usize>],
) -> bool {
    let mut topic_iter = topic_parts.iter();

    for f in filter_parts {
        let level = &filter[f.clone()];

        if level == "#" {
            // # matches everything remaining, including nothing
            return true;
        }

        match topic_iter.next() {
            Some(t) if level == "+" || level == &topic[t.clone()] => {}
            _ => return false,
        }
    }

    // Both must be exhausted for a match
    topic_iter.next().is_none()
}
