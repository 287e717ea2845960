//! Thin client for the chat-completion style LLM used by the write-guard
//! arbiter and by gist generation. Both callers send a prompt and expect a
//! JSON object back; this module owns the HTTP plumbing and leaves parsing
//! of the returned JSON to the caller, since the expected shape differs.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, StratumError};

/// Abstracts over the remote LLM so guard/gist logic can be tested with a
/// fake that returns canned completions.
pub trait LlmProvider: Send + Sync {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

pub struct HttpLlmProvider {
    client: reqwest::Client,
    api_base: String,
    model: String,
}

impl HttpLlmProvider {
    pub fn new(api_base: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .expect("reqwest client"),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    async fn complete_async(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0.0,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StratumError::Internal(format!(
                "llm completion failed: {status} {text}"
            )));
        }
        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| StratumError::Internal("empty LLM response".into()))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmProvider for HttpLlmProvider {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.complete_async(system_prompt, user_prompt))
        })
    }
}
