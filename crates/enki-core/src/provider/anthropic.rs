use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse, FinishReason, Message, Provider, Role, TokenUsage};
use crate::util::http;

use super::sse::{self, Delta};
use super::{check_status, ChunkStream, LlmProvider};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Native Anthropic Messages API provider.
pub struct AnthropicProvider {
    api_base: String,
}

impl AnthropicProvider {
    pub fn new(api_base: Option<String>) -> Self {
        let base = api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self {
            api_base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Normalize model name: strip "anthropic/" prefix.
    fn normalize_model(model: &str) -> &str {
        model.strip_prefix("anthropic/").unwrap_or(model)
    }

    /// Anthropic takes the system prompt as a top-level field.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system: Vec<&str> = Vec::new();
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system.push(&msg.content),
                Role::User => converted.push(json!({
                    "role": "user",
                    "content": user_content(msg),
                })),
                Role::Assistant => converted.push(json!({
                    "role": "assistant",
                    "content": msg.content,
                })),
            }
        }

        let system = if system.is_empty() { None } else { Some(system.join("\n\n")) };
        (system, converted)
    }

    fn build_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::convert_messages(&request.messages);
        let mut body = json!({
            "model": Self::normalize_model(&request.model),
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.api_base);
        debug!("Anthropic request to {} with model {}", url, request.model);

        let response = http::client()
            .post(&url)
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&Self::build_body(request, stream))
            .send()
            .await?;
        check_status(response).await
    }
}

fn user_content(msg: &Message) -> serde_json::Value {
    match &msg.image {
        Some(image) => json!([
            {
                "type": "image",
                "source": { "type": "base64", "media_type": image.media_type, "data": image.data },
            },
            { "type": "text", "text": msg.content },
        ]),
        None => json!(msg.content),
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let response = self.post(request, false).await?;
        let data: serde_json::Value = response.json().await?;
        parse_anthropic_response(&data)
    }

    async fn chat_stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.post(request, true).await?;
        Ok(sse::delta_stream(response.bytes_stream(), parse_anthropic_event))
    }

    fn kind(&self) -> Provider {
        Provider::Anthropic
    }
}

/// Interpret one streamed event payload.
pub fn parse_anthropic_event(data: &str) -> Result<Delta, ProviderError> {
    let parsed = sse::parse_json(data)?;
    match parsed.get("type").and_then(|v| v.as_str()).unwrap_or("") {
        "content_block_delta" => {
            let delta = parsed.get("delta");
            let is_text = delta
                .and_then(|d| d.get("type"))
                .and_then(|v| v.as_str())
                == Some("text_delta");
            match delta.and_then(|d| d.get("text")).and_then(|v| v.as_str()) {
                Some(text) if is_text => Ok(Delta::Text(text.to_string())),
                _ => Ok(Delta::Skip),
            }
        }
        "message_stop" => Ok(Delta::Done),
        "error" => {
            let message = parsed
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("stream error")
                .to_string();
            Err(ProviderError::Other(message))
        }
        _ => Ok(Delta::Skip),
    }
}

/// Parse a non-streamed Messages API response.
pub fn parse_anthropic_response(data: &serde_json::Value) -> Result<CompletionResponse, ProviderError> {
    let blocks = data
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProviderError::Parse("No content in response".to_string()))?;

    let content: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|v| v.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|v| v.as_str()))
        .collect();

    let finish_reason = match data.get("stop_reason").and_then(|v| v.as_str()) {
        Some("max_tokens") => FinishReason::Length,
        _ => FinishReason::Stop,
    };

    let usage = data
        .get("usage")
        .map(|u| {
            let field = |k: &str| u.get(k).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let prompt_tokens = field("input_tokens");
            let completion_tokens = field("output_tokens");
            TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        content,
        finish_reason,
        usage,
    })
}
