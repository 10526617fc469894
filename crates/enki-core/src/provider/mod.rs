pub mod anthropic;
pub mod openai_compat;
pub mod sse;

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::config::Config;
use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse, FinishReason, Provider, TokenUsage};

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;

/// Incremental text fragments of one reply.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// An external completion API.
///
/// Providers hold no credentials; the caller's key travels with each request.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a request and wait for the whole reply.
    async fn chat(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let mut chunks = self.chat_stream(request).await?;
        let mut content = String::new();
        while let Some(chunk) = chunks.next().await {
            content.push_str(&chunk?);
        }
        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        })
    }

    /// Send a request and stream the reply as it is generated.
    async fn chat_stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ProviderError>;

    /// Which vendor this talks to.
    fn kind(&self) -> Provider;
}

/// One provider instance per vendor.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<Provider, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Real HTTP providers, honoring `api_base` overrides.
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .with(Arc::new(OpenAiCompatProvider::new(
                config.api_base(Provider::OpenAi).map(str::to_string),
            )))
            .with(Arc::new(AnthropicProvider::new(
                config.api_base(Provider::Anthropic).map(str::to_string),
            )))
    }

    /// Register (or replace) the provider for its vendor.
    pub fn with(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: Provider) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = Provider> + '_ {
        self.providers.keys().copied()
    }
}

/// Reject a non-success response, keeping the body as the message.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        message: error_message(&text),
    })
}

/// Pull `error.message` out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
