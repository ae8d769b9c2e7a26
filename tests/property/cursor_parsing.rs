//! Property tests for query parameter parsing on the fetch path.
//!
//! 1. Any non-negative integer cursor parses to exactly that sequence.
//! 2. Any negative cursor is rejected as `Negative`.
//! 3. Arbitrary input never panics and never yields a cursor it did not spell.
//! 4. Clamped integers always land inside the requested bounds.

use parley_proto::message::Sequence;
use parley_proto::sync::{CursorError, parse_clamped, parse_cursor};
use proptest::prelude::*;

proptest! {
    #[test]
    fn non_negative_cursor_round_trips(n in any::<u64>()) {
        prop_assert_eq!(parse_cursor(Some(&n.to_string())), Ok(Sequence::new(n)));
    }

    #[test]
    fn negative_cursor_is_rejected(n in 1..i64::MAX) {
        let raw = format!("-{n}");
        prop_assert_eq!(parse_cursor(Some(&raw)), Err(CursorError::Negative(-i128::from(n))));
    }

    #[test]
    fn arbitrary_cursor_never_panics(raw in ".{0,40}") {
        if let Ok(seq) = parse_cursor(Some(&raw)) {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                prop_assert_eq!(seq, Sequence::ZERO);
            } else {
                prop_assert_eq!(trimmed.parse::<i128>().ok(), Some(i128::from(seq.get())));
            }
        }
    }

    #[test]
    fn clamped_stays_in_bounds(
        raw in proptest::option::of("-?[0-9]{0,25}"),
        min in 0usize..50,
        span in 0usize..500,
    ) {
        let max = min + span;
        let default = min + span / 2;
        let value = parse_clamped(raw.as_deref(), default, min, max);
        prop_assert!(value >= min && value <= max);
    }
}
