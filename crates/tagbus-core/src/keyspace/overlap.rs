//! Wildcard-overlap predicate shared by every transport implementation.
//!
//! Two topics overlap when some concrete topic could match both of them.
//! With the single-segment wildcard `*` as the only wildcard, that reduces to
//! a segment-by-segment comparison of equal-length topics.

use super::{SEPARATOR, WILDCARD};

/// Returns `true` when `a` and `b` can match a common concrete topic.
///
/// Both sides may contain wildcards.  Topics of different segment counts
/// never overlap.
///
/// # Examples
///
/// ```rust
/// use tagbus_core::keyspace::overlap;
///
/// assert!(overlap("*/NODE/name", "*/NODE/name"));
/// assert!(overlap("a/*/c", "a/b/c"));
/// assert!(!overlap("a/*/c", "a/*/d"));
/// assert!(!overlap("1/2/3", "1/2"));
/// ```
pub fn overlap(a: &str, b: &str) -> bool {
    let mut left = a.split(SEPARATOR);
    let mut right = b.split(SEPARATOR);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) => {
                if x != y && x != WILDCARD && y != WILDCARD {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// Returns `true` when the subscription `pattern` receives `topic`.
///
/// Same predicate as [`overlap`]; named separately for readability at
/// dispatch sites.
pub fn matches(pattern: &str, topic: &str) -> bool {
    overlap(pattern, topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_wildcarded_topics_overlap() {
        assert!(overlap("*/NODE/name", "*/NODE/name"));
    }

    #[test]
    fn test_differing_literal_under_shared_wildcard_does_not_overlap() {
        assert!(!overlap("a/*/c", "a/*/d"));
    }

    #[test]
    fn test_differing_lengths_never_overlap() {
        assert!(!overlap("1/2/3", "1/2"));
        assert!(!overlap("*", "a/b"));
        assert!(!overlap("a/b", "a/b/*"));
    }

    #[test]
    fn test_wildcard_on_either_side_matches_literal() {
        assert!(overlap("a/*", "a/b"));
        assert!(overlap("a/b", "a/*"));
        assert!(overlap("*/*", "x/y"));
    }

    #[test]
    fn test_overlap_is_symmetric() {
        let cases = [
            ("a/*/c", "a/b/c"),
            ("a/b/c", "a/b/d"),
            ("r/NODE/n/METHODS/m/*/*", "r/NODE/n/METHODS/m/caller/1"),
            ("", ""),
            ("", "*"),
        ];
        for (a, b) in cases {
            assert_eq!(overlap(a, b), overlap(b, a), "asymmetric for {a:?} / {b:?}");
        }
    }

    #[test]
    fn test_empty_segments_are_literal() {
        assert!(overlap("a//b", "a//b"));
        assert!(overlap("a/*/b", "a//b"));
        assert!(!overlap("a//b", "a/x/b"));
    }

    #[test]
    fn test_wildcard_is_whole_segment_only() {
        assert!(!overlap("a/b*", "a/bc"));
    }

    #[test]
    fn test_matches_method_call_pattern() {
        assert!(matches("r/NODE/n/METHODS/m/*/*", "r/NODE/n/METHODS/m/caller/1"));
        assert!(!matches("r/NODE/n/METHODS/m/*/*", "r/NODE/n/METHODS/m/caller/1/RESPONSE"));
    }
}
