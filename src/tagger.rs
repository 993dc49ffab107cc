//! Outbound frame tags and the sent-frame counter.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;

/// Generates the tags that correlate replies with requests.
///
/// A tag is `"<secs>.--<count>"` where `count` is the number of frames sent
/// so far on this connection. The framer bumps the counter once per
/// successful send; `next_tag` itself never mutates it, so callers serialize
/// tag assignment and send under the connection's send lock.
pub struct Tagger {
    reference_secs: AtomicI64,
    msg_count: AtomicU64,
}

impl Tagger {
    pub fn new() -> Self {
        Self {
            reference_secs: AtomicI64::new(Utc::now().timestamp()),
            msg_count: AtomicU64::new(0),
        }
    }

    /// Restart the counter and reference time for a fresh connection.
    pub fn reset(&self) {
        self.reference_secs
            .store(Utc::now().timestamp(), Ordering::SeqCst);
        self.msg_count.store(0, Ordering::SeqCst);
    }

    /// Produce the tag for the next outbound frame.
    pub fn next_tag(&self, long: bool) -> String {
        let secs = self.reference_secs.load(Ordering::SeqCst);
        let count = self.msg_count.load(Ordering::SeqCst);
        if long {
            format!("{secs}.--{count}")
        } else {
            format!("{}.--{}", secs % 1000, count)
        }
    }

    /// Number of frames sent on this connection.
    pub fn count(&self) -> u64 {
        self.msg_count.load(Ordering::SeqCst)
    }

    /// Record one sent frame. Called by the framer after socket hand-off.
    pub fn bump(&self) -> u64 {
        self.msg_count.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for Tagger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_shape() {
        let tagger = Tagger::new();
        let tag = tagger.next_tag(true);
        let (secs, count) = tag.split_once(".--").unwrap();
        assert!(secs.parse::<i64>().unwrap() > 1_500_000_000);
        assert_eq!(count, "0");
    }

    #[test]
    fn test_short_tag_truncates_seconds() {
        let tagger = Tagger::new();
        let tag = tagger.next_tag(false);
        let (secs, _) = tag.split_once(".--").unwrap();
        assert!(secs.parse::<i64>().unwrap() < 1000);
    }

    #[test]
    fn test_bump_advances_tags() {
        let tagger = Tagger::new();
        let first = tagger.next_tag(true);
        tagger.bump();
        let second = tagger.next_tag(true);
        assert_ne!(first, second);
        assert!(second.ends_with(".--1"));
        assert_eq!(tagger.count(), 1);
    }

    #[test]
    fn test_reset_restarts_count() {
        let tagger = Tagger::new();
        tagger.bump();
        tagger.bump();
        tagger.reset();
        assert_eq!(tagger.count(), 0);
        assert!(tagger.next_tag(true).ends_with(".--0"));
    }
}
