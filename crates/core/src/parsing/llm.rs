//! Optional chat-completion-backed filename parser, consulted only when the
//! heuristic parser's confidence is below a configured threshold.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Per-call timeout; LLM calls get their own short timeout distinct from
/// operation-level wall-clock budgets.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmCandidate {
    pub author: Option<String>,
    pub series: Option<String>,
    pub title: Option<String>,
    pub series_position: Option<i32>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM parser unavailable: {0}")]
    Unavailable(String),
    #[error("LLM parser quota exceeded")]
    Quota,
}

/// Directory-chain context passed alongside the filename, carrying no user
/// data beyond path components.
#[derive(Debug, Clone, Default)]
pub struct LlmContext {
    pub directory_chain: Vec<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct LlmParser {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl LlmParser {
    /// `None` when no API key is configured — the reconciler treats an
    /// absent parser the same as a disabled one, never calling it.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Option<Self> {
        let api_key = api_key.filter(|k| !k.trim().is_empty())?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .ok()?;
        Some(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            model: "gpt-4o-mini".to_string(),
        })
    }

    /// At most once per file per scan — callers (the scanner) are
    /// responsible for that cardinality; this method itself is stateless.
    pub async fn parse(&self, filename: &str, context: &LlmContext) -> Result<LlmCandidate, LlmError> {
        let prompt = format!(
            "Extract author, series, title, and series_position (integer or null) as a JSON object \
             with exactly those four keys from this audiobook filename and its directory chain. \
             Respond with JSON only.\nfilename: {filename}\ndirectory_chain: {}",
            context.directory_chain.join(" / ")
        );

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::Quota);
        }
        if !response.status().is_success() {
            return Err(LlmError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Unavailable("empty choices array".into()))?;

        serde_json::from_str(&content).map_err(|e| {
            warn!(error = %e, "LLM response did not match the expected schema");
            LlmError::Unavailable("malformed JSON schema in response".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_api_key_yields_no_parser() {
        assert!(LlmParser::new("https://example.invalid", None).is_none());
    }

    #[test]
    fn blank_api_key_yields_no_parser() {
        assert!(LlmParser::new("https://example.invalid", Some("   ".into())).is_none());
    }

    #[test]
    fn well_formed_key_yields_a_parser() {
        assert!(LlmParser::new("https://example.invalid", Some("sk-test".into())).is_some());
    }
}
