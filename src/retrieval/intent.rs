//! Rule-based intent classification: scores a preprocessed query against
//! fixed keyword families and maps the winner to a retrieval strategy.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Factual,
    Exploratory,
    Temporal,
    Causal,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Factual => "factual",
            Intent::Exploratory => "exploratory",
            Intent::Temporal => "temporal",
            Intent::Causal => "causal",
            Intent::Unknown => "unknown",
        }
    }

    /// Strategy template name and the candidate-multiplier override this
    /// intent applies (`None` leaves the caller's requested multiplier as-is).
    pub fn strategy(&self) -> (&'static str, Option<u32>) {
        match self {
            Intent::Factual => ("factual_high_precision", Some(2)),
            Intent::Exploratory => ("exploratory_high_recall", Some(6)),
            Intent::Temporal => ("temporal_time_filtered", Some(5)),
            Intent::Causal => ("causal_wide_pool", Some(8)),
            Intent::Unknown => ("default", None),
        }
    }
}

const FACTUAL_WORDS: &[&str] = &["what", "who", "when", "is", "define", "definition"];
const EXPLORATORY_WORDS: &[&str] = &["explore", "overview", "ideas", "brainstorm", "survey"];
const TEMPORAL_WORDS: &[&str] = &["before", "after", "since", "until", "history", "recent", "latest"];
const CAUSAL_WORDS: &[&str] = &["why", "because", "cause", "effect", "reason", "due to"];

fn score(tokens: &[String], family: &[&str]) -> usize {
    tokens
        .iter()
        .filter(|t| family.contains(&t.to_lowercase().as_str()))
        .count()
}

/// Classify intent from the already-lowercased token list of a preprocessed
/// query. Ties (including all-zero scores) resolve to `Unknown`.
pub fn classify_intent(tokens: &[String]) -> Intent {
    let scores = [
        (Intent::Factual, score(tokens, FACTUAL_WORDS)),
        (Intent::Exploratory, score(tokens, EXPLORATORY_WORDS)),
        (Intent::Temporal, score(tokens, TEMPORAL_WORDS)),
        (Intent::Causal, score(tokens, CAUSAL_WORDS)),
    ];

    let max_score = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
    if max_score == 0 {
        return Intent::Unknown;
    }
    let winners: Vec<_> = scores.iter().filter(|(_, s)| *s == max_score).collect();
    if winners.len() > 1 {
        return Intent::Unknown;
    }
    winners[0].0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn classifies_factual() {
        assert_eq!(classify_intent(&toks("what is rust")), Intent::Factual);
    }

    #[test]
    fn classifies_causal() {
        assert_eq!(classify_intent(&toks("why did the build fail")), Intent::Causal);
    }

    #[test]
    fn ties_resolve_to_unknown() {
        // "what" (factual) and "why" (causal) each score 1.
        assert_eq!(classify_intent(&toks("what why")), Intent::Unknown);
    }

    #[test]
    fn no_matches_resolve_to_unknown() {
        assert_eq!(classify_intent(&toks("rust memory allocator")), Intent::Unknown);
    }

    #[test]
    fn strategy_overrides_multiplier() {
        assert_eq!(Intent::Causal.strategy(), ("causal_wide_pool", Some(8)));
        assert_eq!(Intent::Unknown.strategy(), ("default", None));
    }
}
