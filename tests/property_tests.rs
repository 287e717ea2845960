//! Property-based tests for stratum
//!
//! These tests verify invariants that must hold for all inputs:
//! - Path joining never panics and stays within the root-vs-nested rule
//! - State-hash bucketing is stable across clock drift within a minute
//! - Enum wire representations round-trip through their string form
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

mod path_tests {
    use super::*;
    use stratum::memory::join_path;

    proptest! {
        /// Invariant: join_path never panics on any input
        #[test]
        fn never_panics(parent in ".*", title in ".*") {
            let _ = join_path(&parent, &title);
        }

        /// Invariant: an empty (or slash-only) parent yields just the
        /// trimmed title, never a leading slash
        #[test]
        fn root_has_no_separator(title in "[a-zA-Z0-9_-]{1,20}") {
            let joined = join_path("", &title);
            prop_assert_eq!(&joined, &title);
            prop_assert!(!joined.starts_with('/'));
        }

        /// Invariant: a non-empty parent always produces exactly one
        /// separator between parent and title
        #[test]
        fn nested_has_one_separator(
            parent in "[a-zA-Z0-9_-]{1,20}",
            title in "[a-zA-Z0-9_-]{1,20}",
        ) {
            let joined = join_path(&parent, &title);
            prop_assert_eq!(joined, format!("{parent}/{title}"));
        }
    }
}

mod state_hash_tests {
    use super::*;
    use stratum::memory::state_hash;
    use stratum::types::{Memory, MemoryPath};

    fn memory_with(last_accessed_at: Option<String>, vitality_score: f64) -> Memory {
        Memory {
            id: 1,
            content: "body".to_string(),
            priority: 0,
            disclosure: None,
            deprecated: false,
            migrated_to: None,
            created_at: "2026-01-01T00:00:00".to_string(),
            vitality_score,
            last_accessed_at,
            access_count: 3,
        }
    }

    proptest! {
        /// Invariant: two timestamps in the same minute bucket yield the
        /// same state_hash (spec invariant: clock-drift stability).
        #[test]
        fn stable_within_minute_bucket(minute in 0u8..59, sec_a in 0u8..59, sec_b in 0u8..59, vitality in 0.0f64..1.0) {
            let ts_a = format!("2026-01-01T12:{minute:02}:{sec_a:02}");
            let ts_b = format!("2026-01-01T12:{minute:02}:{sec_b:02}");
            let paths: Vec<MemoryPath> = Vec::new();

            let hash_a = state_hash(&memory_with(Some(ts_a), vitality), &paths);
            let hash_b = state_hash(&memory_with(Some(ts_b), vitality), &paths);
            prop_assert_eq!(hash_a, hash_b);
        }

        /// Invariant: state_hash is a pure function of its inputs — calling
        /// it twice on identical memory/paths never drifts.
        #[test]
        fn deterministic(vitality in 0.0f64..1.0, access_count in 0i64..1000) {
            let mut memory = memory_with(Some("2026-01-01T12:00:00".to_string()), vitality);
            memory.access_count = access_count;
            let paths: Vec<MemoryPath> = Vec::new();

            let first = state_hash(&memory, &paths);
            let second = state_hash(&memory, &paths);
            prop_assert_eq!(first, second);
        }
    }
}

mod search_mode_tests {
    use super::*;
    use stratum::retrieval::SearchMode;

    proptest! {
        /// Invariant: every SearchMode round-trips through its string form
        #[test]
        fn roundtrip(mode in prop_oneof![
            Just(SearchMode::Keyword),
            Just(SearchMode::Semantic),
            Just(SearchMode::Hybrid),
        ]) {
            let s = mode.as_str();
            let parsed: SearchMode = s.parse().unwrap();
            prop_assert_eq!(mode, parsed);
        }

        /// Invariant: unknown mode strings fail parsing rather than silently
        /// defaulting (callers decide the Hybrid fallback, not FromStr)
        #[test]
        fn unknown_mode_fails(s in "[a-z]{4,15}") {
            if !matches!(s.as_str(), "keyword" | "semantic" | "hybrid") {
                let result: Result<SearchMode, _> = s.parse();
                prop_assert!(result.is_err());
            }
        }
    }
}

mod gist_method_tests {
    use super::*;
    use stratum::types::GistMethod;

    proptest! {
        /// Invariant: every GistMethod round-trips through its string form
        #[test]
        fn roundtrip(method in prop_oneof![
            Just(GistMethod::LlmGist),
            Just(GistMethod::ExtractiveBullets),
            Just(GistMethod::SentenceFallback),
            Just(GistMethod::TruncateFallback),
            Just(GistMethod::SleepFragmentRollup),
        ]) {
            let s = method.as_str();
            let parsed: GistMethod = s.parse().unwrap();
            prop_assert_eq!(method, parsed);
        }
    }
}
