//! Topic segment splitting strategies
//!
//! Splitting on `/` is the only per-message work matching does besides
//! comparing bytes. A portable byte scan is always available; a
//! vectorized scan backed by `memchr` is picked at startup when the CPU
//! supports it.

use std::ops::Range;

use tracing::debug;

/// Splits a topic into `/`-separated segments.
///
/// Segments are written as byte ranges into the input, so callers can keep
/// a scratch buffer alive across calls without borrowing the topic. Empty
/// segments are kept: `"/a//b/"` has five segments.
pub trait SegmentSplitter: Send + Sync {
    /// Clear `out` and fill it with the segment ranges of `topic`
    fn split(&self, topic: &str, out: &mut Vec<Range<usize>>);

    fn name(&self) -> &'static str;
}

/// Byte-at-a-time scan, works everywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct PortableSplitter;

impl SegmentSplitter for PortableSplitter {
    fn split(&self, topic: &str, out: &mut Vec<Range<usize>>) {
        out.clear();
        let mut start = 0;
        for (i, &b) in topic.as_bytes().iter().enumerate() {
            if b == b'/' {
                out.push(start..i);
                start = i + 1;
            }
        }
        out.push(start..topic.len());
    }

    fn name(&self) -> &'static str {
        "portable"
    }
}

/// Vectorized separator search via `memchr`
#[derive(Debug, Clone, Copy, Default)]
pub struct MemchrSplitter;

impl SegmentSplitter for MemchrSplitter {
    fn split(&self, topic: &str, out: &mut Vec<Range<usize>>) {
        out.clear();
        let mut start = 0;
        for i in memchr::memchr_iter(b'/', topic.as_bytes()) {
            out.push(start..i);
            start = i + 1;
        }
        out.push(start..topic.len());
    }

    fn name(&self) -> &'static str {
        "memchr"
    }
}

static PORTABLE: PortableSplitter = PortableSplitter;
static MEMCHR: MemchrSplitter = MemchrSplitter;

/// Probe the CPU and return the fastest available splitter
pub fn detect() -> &'static dyn SegmentSplitter {
    let splitter: &'static dyn SegmentSplitter = if simd_available() {
        &MEMCHR
    } else {
        &PORTABLE
    };
    debug!(splitter = splitter.name(), "Selected topic segment splitter");
    splitter
}

/// The portable splitter, for callers that want deterministic behavior
pub fn portable() -> &'static dyn SegmentSplitter {
    &PORTABLE
}

#[cfg(target_arch = "x86_64")]
fn simd_available() -> bool {
    std::is_x86_feature_detected!("sse2")
}

#[cfg(target_arch = "aarch64")]
fn simd_available() -> bool {
    std::arch::is_aarch64_feature_detected!("neon")
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn simd_available() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;

    fn segments<'a>(splitter: &dyn SegmentSplitter, topic: &'a str) -> Vec<&'a str> {
        let mut out = Vec::new();
        splitter.split(topic, &mut out);
        out.into_iter().map(|r| &topic[r]).collect()
    }

    #[test_case("a/b/c", &["a", "b", "c"] ; "plain")]
    #[test_case("", &[""] ; "empty topic")]
    #[test_case("/", &["", ""] ; "lone slash")]
    #[test_case("/a//b/", &["", "a", "", "b", ""] ; "empty segments kept")]
    #[test_case("$SYS/broker", &["$SYS", "broker"] ; "dollar topic")]
    fn test_split(topic: &str, expected: &[&str]) {
        assert_eq!(segments(&PortableSplitter, topic), expected);
        assert_eq!(segments(&MemchrSplitter, topic), expected);
    }

    #[test]
    fn test_split_clears_scratch() {
        let mut out = vec![0..100, 5..7];
        PortableSplitter.split("x", &mut out);
        assert_eq!(out, vec![0..1]);
        MemchrSplitter.split("a/b", &mut out);
        assert_eq!(out, vec![0..1, 2..3]);
    }

    #[test]
    fn test_detect_returns_working_splitter() {
        let splitter = detect();
        assert!(["portable", "memchr"].contains(&splitter.name()));
        assert_eq!(segments(splitter, "a/b"), vec!["a", "b"]);
    }

    proptest! {
        #[test]
        fn splitters_agree(topic in "[a-z/]{0,40}") {
            prop_assert_eq!(segments(&PortableSplitter, &topic), segments(&MemchrSplitter, &topic));
            prop_assert_eq!(segments(&PortableSplitter, &topic), topic.split('/').collect::<Vec<_>>());
        }
    }
}
