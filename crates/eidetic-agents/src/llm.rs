//! The LLM oracle: a provider-agnostic JSON-returning chat call.
//!
//! One operation matters: send messages, get back either free text or a
//! strictly parsed JSON object. Transport trouble and malformed output are
//! separate failure modes with separate retry policies.

use async_trait::async_trait;
use eidetic_core::LlmError;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

/// A single chat turn.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Per-call tuning.
#[derive(Debug, Clone, Copy)]
pub struct ChatParams {
    pub temperature: f64,
    pub max_tokens: u32,
    /// Ask the provider for a guaranteed-JSON response body.
    pub json_mode: bool,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            json_mode: false,
        }
    }
}

/// The oracle seam. Calls are independent; implementations hold no
/// conversation state.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Free-text completion.
    async fn chat(&self, messages: &[ChatMessage], params: ChatParams)
        -> Result<String, LlmError>;

    /// Strict-JSON completion: guarantees a parsed JSON object or
    /// [`LlmError::Format`] after a bounded retry budget. Each retry raises
    /// the temperature a step and strengthens the JSON-only instruction.
    async fn chat_json(
        &self,
        messages: &[ChatMessage],
        params: ChatParams,
    ) -> Result<Value, LlmError> {
        let attempts = self.json_retry_budget().max(1);
        let mut last_detail = String::new();

        for attempt in 0..attempts {
            let mut messages = messages.to_vec();
            if attempt > 0 {
                messages.push(ChatMessage::system(
                    "Previous reply was not a valid JSON object. Respond with exactly one \
                     JSON object and nothing else: no prose, no code fences.",
                ));
            }
            let params = ChatParams {
                temperature: (params.temperature + 0.1 * attempt as f64).min(1.0),
                json_mode: true,
                ..params
            };

            let content = self.chat(&messages, params).await?;
            match parse_json_object(&content) {
                Ok(value) => return Ok(value),
                Err(detail) => {
                    warn!(attempt = attempt + 1, %detail, "LLM reply was not strict JSON");
                    last_detail = detail;
                }
            }
        }

        Err(LlmError::Format {
            attempts,
            detail: last_detail,
        })
    }

    /// Bounded in-call retry budget for malformed JSON (≥ 3).
    fn json_retry_budget(&self) -> u32 {
        3
    }
}

/// Extract a JSON object from model output, tolerating code fences and
/// surrounding prose.
fn parse_json_object(content: &str) -> Result<Value, String> {
    let trimmed = content.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(Value::Object(map));
    }

    // Fall back to the outermost brace span.
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if end > start {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(Value::Object(map));
            }
        }
    }
    Err(format!(
        "no JSON object in reply ({} chars)",
        trimmed.len()
    ))
}

// ============================================================================
// HTTP implementation (OpenAI-compatible chat endpoint)
// ============================================================================

/// Chat client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpChatModel {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_retries: u32,
    backoff: Duration,
}

impl HttpChatModel {
    pub fn new(
        api_base: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Unavailable(format!("http client init: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_retries,
            backoff,
        })
    }

    async fn post_completion(&self, body: &Value) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.api_base);
        let mut last_error = String::new();

        for attempt in 0..self.max_retries.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.backoff * 2u32.saturating_pow(attempt - 1)).await;
            }

            let sent = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match sent {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if matches!(status, 408 | 409 | 429 | 500 | 502 | 503 | 504) {
                        last_error = format!("transient status {status}");
                        warn!(status, attempt, "transient LLM error, will retry");
                        continue;
                    }
                    if !response.status().is_success() {
                        let text = response.text().await.unwrap_or_default();
                        return Err(LlmError::Unavailable(format!("status {status}: {text}")));
                    }
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| LlmError::Unavailable(format!("response decode: {e}")));
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(error = %last_error, attempt, "LLM transport error, will retry");
                }
            }
        }

        Err(LlmError::Unavailable(last_error))
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: ChatParams,
    ) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::Unavailable("LLM_API_KEY is not configured".into()));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(|m| json!({
                "role": m.role,
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        if params.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let data = self.post_completion(&body).await?;
        extract_content(&data)
    }
}

/// Pull the assistant text out of a chat-completions response. Content may
/// arrive as a string, a parts array, or (some providers) a raw object.
fn extract_content(data: &Value) -> Result<String, LlmError> {
    let message = &data["choices"][0]["message"];
    let content = &message["content"];

    if let Some(text) = content.as_str() {
        return Ok(text.to_string());
    }
    if let Some(parts) = content.as_array() {
        let mut out = String::new();
        for part in parts {
            if let Some(s) = part.as_str() {
                out.push_str(s);
            } else if part["type"] == "text" {
                out.push_str(part["text"].as_str().unwrap_or(""));
            }
        }
        return Ok(out);
    }
    if content.is_object() {
        return Ok(content.to_string());
    }
    Err(LlmError::Unavailable("LLM returned no choices".into()))
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A model that always fails; for tests that never reach the oracle.
    pub struct SilentModel;

    #[async_trait]
    impl ChatModel for SilentModel {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _params: ChatParams,
        ) -> Result<String, LlmError> {
            Err(LlmError::Unavailable("no model in this test".into()))
        }
    }

    /// Replays queued responses in order, then fails.
    pub struct QueueModel {
        pub responses: Mutex<VecDeque<String>>,
        pub calls: Mutex<Vec<ChatParams>>,
    }

    impl QueueModel {
        pub fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for QueueModel {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            params: ChatParams,
        ) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(params);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Unavailable("queue exhausted".into()))
        }
    }
}
