//! Query preprocessing: whitespace normalization, lowercasing for scoring,
//! and tokenization, while preserving `domain://path` URIs and non-ASCII
//! tokens verbatim.

#[derive(Debug, Clone, serde::Serialize)]
pub struct PreprocessedQuery {
    pub original: String,
    pub normalized: String,
    pub rewritten: String,
    pub tokens: Vec<String>,
    pub changed: bool,
}

fn is_uri_token(token: &str) -> bool {
    token.contains("://")
}

fn strip_trailing_punct(token: &str) -> &str {
    token.trim_end_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';' | ':'))
}

pub fn preprocess_query(query: &str) -> PreprocessedQuery {
    let original = query.to_string();
    let collapsed: String = original.split_whitespace().collect::<Vec<_>>().join(" ");

    let tokens: Vec<String> = collapsed
        .split_whitespace()
        .map(|tok| {
            if is_uri_token(tok) {
                tok.to_string()
            } else {
                strip_trailing_punct(tok).to_string()
            }
        })
        .filter(|t| !t.is_empty())
        .collect();

    let rewritten = tokens.join(" ");

    let normalized: String = tokens
        .iter()
        .map(|t| {
            if is_uri_token(t) {
                t.clone()
            } else {
                t.to_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    let changed = rewritten != original;

    PreprocessedQuery {
        original,
        normalized,
        rewritten,
        tokens,
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_lowercases() {
        let p = preprocess_query("  Hello   World  ");
        assert_eq!(p.rewritten, "Hello World");
        assert_eq!(p.normalized, "hello world");
        assert!(p.changed);
    }

    #[test]
    fn preserves_uris_verbatim() {
        let p = preprocess_query("see core://Project/Notes for details.");
        assert!(p.tokens.contains(&"core://Project/Notes".to_string()));
        assert!(p.normalized.contains("core://Project/Notes"));
    }

    #[test]
    fn strips_trailing_punctuation() {
        let p = preprocess_query("what is rust?");
        assert_eq!(p.tokens.last().unwrap(), "rust");
    }

    #[test]
    fn unchanged_query_reports_changed_false() {
        let p = preprocess_query("already clean");
        assert!(!p.changed);
    }
}
