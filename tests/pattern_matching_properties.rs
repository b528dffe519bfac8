//! Property coverage for the branch wildcard matcher (spec §4.8) that's
//! awkward to enumerate by hand with example-based tests alone.

use proptest::prelude::*;

use cyre::branch::matches_pattern;

fn segment() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

proptest! {
    /// A pattern with no wildcards only ever matches the exact id it spells out.
    #[test]
    fn literal_pattern_matches_only_itself(segments in prop::collection::vec(segment(), 1..5)) {
        let id = segments.join("/");
        prop_assert!(matches_pattern(&id, &id));
        let mutated = format!("{id}/extra");
        prop_assert!(!matches_pattern(&mutated, &id));
    }

    /// Appending `/**` to any concrete path matches that path and every
    /// deeper path under it, regardless of how many segments are appended.
    #[test]
    fn double_star_matches_the_prefix_and_any_depth_below_it(
        prefix in prop::collection::vec(segment(), 1..4),
        suffix in prop::collection::vec(segment(), 0..4),
    ) {
        let pattern = format!("{}/**", prefix.join("/"));
        let prefix_only = prefix.join("/");
        prop_assert!(matches_pattern(&prefix_only, &pattern));

        let mut full = prefix.clone();
        full.extend(suffix);
        prop_assert!(matches_pattern(&full.join("/"), &pattern));
    }

    /// A single `*` always consumes exactly one segment: same-length ids with
    /// any value in that slot match, but any other length never does.
    #[test]
    fn single_star_consumes_exactly_one_segment(
        prefix in prop::collection::vec(segment(), 0..3),
        filler in segment(),
        suffix in prop::collection::vec(segment(), 0..3),
    ) {
        let mut pattern_segments = prefix.clone();
        pattern_segments.push("*".to_string());
        pattern_segments.extend(suffix.clone());
        let pattern = pattern_segments.join("/");

        let mut id_segments = prefix.clone();
        id_segments.push(filler);
        id_segments.extend(suffix.clone());
        prop_assert!(matches_pattern(&id_segments.join("/"), &pattern));

        let mut too_long = prefix;
        too_long.push("a".into());
        too_long.push("b".into());
        too_long.extend(suffix);
        prop_assert!(!matches_pattern(&too_long.join("/"), &pattern));
    }
}
