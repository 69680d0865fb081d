//! External voice-runtime adapter.
//!
//! Outbound: replace the active system prompt of a conversational agent.
//! Inbound: validate and parse the post-call transcript webhook. Both ends
//! tolerate the payload variety the runtime actually produces.

use std::time::Duration;

use async_trait::async_trait;
use eidetic_core::{PublishError, WebhookError};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Outbound: script publication
// ============================================================================

/// Seam for pushing a rendered interviewer prompt to the voice runtime.
#[async_trait]
pub trait ScriptPublisher: Send + Sync {
    async fn publish(&self, agent_id: &str, prompt: &str) -> Result<(), PublishError>;
}

/// HTTP publisher: PATCHes the agent's conversation config, retrying
/// transient failures with exponential backoff.
pub struct VoiceRuntimeClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    max_retries: u32,
    backoff: Duration,
}

impl VoiceRuntimeClient {
    pub fn new(
        api_base: &str,
        api_key: &str,
        timeout: Duration,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError(format!("http client init: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_retries,
            backoff,
        })
    }
}

#[async_trait]
impl ScriptPublisher for VoiceRuntimeClient {
    async fn publish(&self, agent_id: &str, prompt: &str) -> Result<(), PublishError> {
        if self.api_key.is_empty() {
            return Err(PublishError("VOICE_API_KEY is not configured".into()));
        }
        if agent_id.is_empty() {
            return Err(PublishError("voice agent id is missing".into()));
        }

        let url = format!("{}/convai/agents/{agent_id}", self.api_base);
        let body = serde_json::json!({
            "conversation_config": {
                "agent": {
                    "prompt": { "prompt": prompt }
                }
            }
        });

        let mut last_error = String::new();
        for attempt in 0..self.max_retries.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.backoff * 2u32.saturating_pow(attempt - 1)).await;
            }

            match self
                .client
                .patch(&url)
                .header("xi-api-key", &self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if matches!(status, 408 | 409 | 429 | 500 | 502 | 503 | 504) {
                        last_error = format!("transient status {status}");
                        warn!(status, attempt, "transient publish error, will retry");
                        continue;
                    }
                    if !response.status().is_success() {
                        let text = response.text().await.unwrap_or_default();
                        return Err(PublishError(format!("status {status}: {text}")));
                    }
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(error = %last_error, attempt, "publish transport error, will retry");
                }
            }
        }
        Err(PublishError(last_error))
    }
}

// ============================================================================
// Inbound: webhook payload
// ============================================================================

/// A validated transcript delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingTranscript {
    pub conversation_id: String,
    /// Agent that held the conversation; used to locate the owning project.
    pub agent_id: Option<String>,
    /// Explicit project routing, when the payload carries one.
    pub project_id: Option<String>,
    pub transcript: String,
    pub language: Option<String>,
}

/// Parse the webhook JSON. The runtime delivers the transcript as a plain
/// string, a list of `{speaker, text}` turns, or an object with `text` /
/// `segments`; ids may sit at the top level or inside `data`.
pub fn parse_transcript_payload(payload: &Value) -> Result<IncomingTranscript, WebhookError> {
    let data = payload.get("data").filter(|v| v.is_object());
    let pick = |key: &str| -> Option<String> {
        payload
            .get(key)
            .or_else(|| data.and_then(|d| d.get(key)))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let conversation_id = pick("conversation_id")
        .or_else(|| pick("id"))
        .ok_or_else(|| WebhookError::InvalidPayload("conversation_id missing".into()))?;

    let transcript_raw = payload
        .get("transcript")
        .or_else(|| data.and_then(|d| d.get("transcript")))
        .or_else(|| data.and_then(|d| d.get("transcript_text")))
        .or_else(|| payload.get("transcript_text"))
        .unwrap_or(&Value::Null);
    let transcript = extract_text(transcript_raw);
    if transcript.trim().is_empty() {
        return Err(WebhookError::InvalidPayload("transcript missing".into()));
    }

    Ok(IncomingTranscript {
        conversation_id,
        agent_id: pick("agent_id"),
        project_id: pick("project_id"),
        transcript,
        language: pick("language"),
    })
}

fn extract_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let mut lines = Vec::new();
            for item in items {
                match item {
                    Value::String(s) => lines.push(s.clone()),
                    Value::Object(_) => {
                        let text = item
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .trim();
                        if text.is_empty() {
                            continue;
                        }
                        let speaker = item
                            .get("speaker")
                            .or_else(|| item.get("role"))
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .trim();
                        if speaker.is_empty() {
                            lines.push(text.to_string());
                        } else {
                            lines.push(format!("{speaker}: {text}"));
                        }
                    }
                    _ => {}
                }
            }
            lines.join("\n")
        }
        Value::Object(_) => {
            if let Some(text) = value.get("text").and_then(Value::as_str) {
                text.to_string()
            } else if let Some(segments) = value.get("segments") {
                extract_text(segments)
            } else {
                String::new()
            }
        }
        _ => String::new(),
    }
}

// ============================================================================
// Inbound: signature verification
// ============================================================================

/// Verify an HMAC-SHA256 webhook signature of the form `t=<ts>,v0=<hex>`.
///
/// An empty configured secret disables verification. The timestamp must be
/// within `tolerance_secs` of `now_ts`.
pub fn verify_signature(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
    now_ts: i64,
) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Some(header) = signature_header else {
        return false;
    };

    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim() {
            "t" => timestamp = Some(value.trim()),
            "v0" => signature = Some(value.trim()),
            _ => {}
        }
    }
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return false;
    };
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now_ts - ts).abs() > tolerance_secs {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    let digest = mac.finalize().into_bytes();
    let expected = hex_encode(&digest);

    // Constant-time comparison.
    expected.len() == signature.len()
        && expected
            .bytes()
            .zip(signature.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
