use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse, FinishReason, Message, Provider, TokenUsage};
use crate::util::http;

use super::sse::{self, Delta};
use super::{check_status, ChunkStream, LlmProvider};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI Chat Completions provider.
/// Any OpenAI-compatible endpoint works through `api_base`.
pub struct OpenAiCompatProvider {
    api_base: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_base: Option<String>) -> Self {
        let base = api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self {
            api_base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Normalize model name for the API (strip provider prefixes).
    fn normalize_model(model: &str) -> &str {
        model.strip_prefix("openai/").unwrap_or(model)
    }

    /// Build the request body. Reasoning models (o1, o3, o4...) take
    /// `max_completion_tokens` and reject a custom temperature.
    fn build_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let model = Self::normalize_model(&request.model);
        let messages: Vec<serde_json::Value> = request.messages.iter().map(convert_message).collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if is_reasoning_model(model) {
            body["max_completion_tokens"] = json!(request.max_tokens);
        } else {
            body["max_tokens"] = json!(request.max_tokens);
            body["temperature"] = json!(request.temperature);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!("OpenAI request to {} with model {}", url, request.model);

        let response = http::client()
            .post(&url)
            .bearer_auth(&request.api_key)
            .json(&Self::build_body(request, stream))
            .send()
            .await?;
        check_status(response).await
    }
}

fn is_reasoning_model(model: &str) -> bool {
    let mut chars = model.chars();
    chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// A user message with an image becomes a content array.
fn convert_message(m: &Message) -> serde_json::Value {
    match &m.image {
        Some(image) => json!({
            "role": m.role,
            "content": [
                { "type": "text", "text": m.content },
                { "type": "image_url", "image_url": { "url": image.data_url() } },
            ],
        }),
        None => json!({
            "role": m.role,
            "content": m.content,
        }),
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let response = self.post(request, false).await?;
        let data: serde_json::Value = response.json().await?;
        parse_openai_response(&data)
    }

    async fn chat_stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.post(request, true).await?;
        Ok(sse::delta_stream(response.bytes_stream(), parse_openai_delta))
    }

    fn kind(&self) -> Provider {
        Provider::OpenAi
    }
}

/// Interpret one streamed `data:` payload.
pub fn parse_openai_delta(data: &str) -> Result<Delta, ProviderError> {
    if data == "[DONE]" {
        return Ok(Delta::Done);
    }
    let parsed = sse::parse_json(data)?;
    if let Some(err) = parsed.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("stream error")
            .to_string();
        return Err(ProviderError::Other(message));
    }
    let text = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str());
    Ok(match text {
        Some(t) => Delta::Text(t.to_string()),
        None => Delta::Skip,
    })
}

/// Parse a non-streamed response.
pub fn parse_openai_response(data: &serde_json::Value) -> Result<CompletionResponse, ProviderError> {
    let choice = data
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let finish_reason = match choice.get("finish_reason").and_then(|v| v.as_str()) {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::Error,
        _ => FinishReason::Stop,
    };

    let usage = data
        .get("usage")
        .map(|u| {
            let field = |k: &str| u.get(k).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            TokenUsage {
                prompt_tokens: field("prompt_tokens"),
                completion_tokens: field("completion_tokens"),
                total_tokens: field("total_tokens"),
            }
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        content,
        finish_reason,
        usage,
    })
}
