//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Works against Groq, OpenAI and local servers speaking the same wire format.
//! Each triage turn is one stateless exchange: the persona as the system
//! message, the composed prompt as the user message, one reply back.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::llm::{LlmResponse, LlmUsage, ProviderError};

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Cloning is cheap; `reqwest::Client` is reference-counted.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout_seconds: u64,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// `api_key`, when present, is sent as `Authorization: Bearer <key>`.
    pub fn new(
        endpoint: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("cannot build HTTP client: {e}")))?;

        Ok(Self { client, endpoint, model, temperature, max_tokens: None, timeout_seconds, api_key })
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn complete(&self, content: &str, system: Option<&str>) -> Result<LlmResponse, ProviderError> {
        let payload = ChatRequest {
            model: &self.model,
            messages: system
                .map(|s| ChatMessage { role: "system", content: s })
                .into_iter()
                .chain(std::iter::once(ChatMessage { role: "user", content }))
                .collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(model = %self.model, prompt_len = content.len(), "chat completion request");
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(payload = %serde_json::to_string(&payload).unwrap_or_default(), "chat payload");
        }

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = describe_error_body(&body);
            warn!(%status, %message, "chat completion rejected");
            return Err(ProviderError::Status { status: status.as_u16(), message });
        }

        let reply: ChatReply = response.json().await.map_err(|e| self.transport_error(e))?;
        let usage = reply.usage.map(|u| LlmUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        let text = reply
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Request("reply carried no content".into()))?;

        debug!(reply_len = text.len(), "chat completion received");
        Ok(LlmResponse { text, usage })
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            warn!(endpoint = %self.endpoint, timeout_seconds = self.timeout_seconds, "chat completion timed out");
            ProviderError::Timeout(self.timeout_seconds)
        } else if e.is_decode() {
            warn!(error = %e, "chat completion body did not decode");
            ProviderError::Request(format!("malformed reply: {e}"))
        } else {
            warn!(endpoint = %self.endpoint, error = %e, "chat completion transport failure");
            ProviderError::Request(e.to_string())
        }
    }
}

/// Pull `error.message` (and `error.code`) out of the OpenAI error envelope,
/// or fall back to the raw body.
fn describe_error_body(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error: ErrorBody { message, code: Some(code) } }) => {
            let code = code.as_str().map(str::to_string).unwrap_or_else(|| code.to_string());
            format!("{message} [code={code}]")
        }
        Ok(ErrorEnvelope { error: ErrorBody { message, code: None } }) => message,
        Err(_) if body.trim().is_empty() => "<empty body>".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    choices: Vec<ReplyChoice>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

#[derive(Debug, Deserialize)]
struct ReplyUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}
