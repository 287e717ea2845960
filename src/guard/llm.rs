//! Structured-output contract for LLM write-guard arbitration: a prompt
//! containing the candidate content plus the top-K retrieval candidates,
//! expecting back `{action, target_id?, reason, method}`.

use serde::Deserialize;

use super::Action;
use crate::llm::LlmProvider;

#[derive(Debug, Deserialize)]
struct RawArbitration {
    action: String,
    target_id: Option<i64>,
    reason: Option<String>,
}

pub struct LlmArbitration {
    pub action: Action,
    pub target_id: Option<i64>,
    pub reason: String,
}

const SYSTEM_PROMPT: &str = "You decide how a new memory write relates to existing candidates. \
Respond with strict JSON: {\"action\": \"ADD|UPDATE|NOOP|DELETE\", \"target_id\": <int or null>, \"reason\": \"<short>\"}.";

/// Ask the LLM to arbitrate. Returns `None` (never an error) on anything
/// that isn't a clean, valid response — the caller falls back to the
/// deterministic rule either way.
pub fn arbitrate(
    provider: &dyn LlmProvider,
    content: &str,
    candidates: &[(i64, String)],
) -> Option<LlmArbitration> {
    let candidate_lines: String = candidates
        .iter()
        .map(|(id, text)| format!("- id={id}: {text}"))
        .collect::<Vec<_>>()
        .join("\n");
    let user_prompt = format!("New content:\n{content}\n\nCandidates:\n{candidate_lines}");

    let raw = provider.complete(SYSTEM_PROMPT, &user_prompt).ok()?;
    let parsed: RawArbitration = serde_json::from_str(raw.trim()).ok()?;

    let action = match parsed.action.to_uppercase().as_str() {
        "ADD" => Action::Add,
        "UPDATE" => Action::Update,
        "NOOP" => Action::Noop,
        "DELETE" => Action::Delete,
        _ => return None,
    };

    Some(LlmArbitration {
        action,
        target_id: parsed.target_id,
        reason: parsed.reason.unwrap_or_else(|| "llm_arbitration".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    struct Fake(&'static str);
    impl LlmProvider for Fake {
        fn complete(&self, _s: &str, _u: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn parses_valid_response() {
        let fake = Fake(r#"{"action": "UPDATE", "target_id": 7, "reason": "same topic"}"#);
        let result = arbitrate(&fake, "content", &[]).unwrap();
        assert!(matches!(result.action, Action::Update));
        assert_eq!(result.target_id, Some(7));
    }

    #[test]
    fn rejects_invalid_action() {
        let fake = Fake(r#"{"action": "MAYBE", "reason": "unsure"}"#);
        assert!(arbitrate(&fake, "content", &[]).is_none());
    }

    #[test]
    fn rejects_malformed_json() {
        let fake = Fake("not json");
        assert!(arbitrate(&fake, "content", &[]).is_none());
    }
}
