pub mod reply;

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::catalog::{CatalogEntry, ModelCatalog, ModelInfo};
use crate::config::{Config, HistoryConfig, HistoryOverflow};
use crate::error::ChatError;
use crate::types::{CompletionRequest, ImageAttachment, Message, Provider, Role};

pub use reply::{send_to_provider, ReplyStream, ReplyTarget};

/// Chat parameters taken from config when a session starts.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_provider: Provider,
    pub default_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub system_prompt: Option<String>,
    pub history: HistoryConfig,
    pub request_timeout: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ChatSettings {
    fn from(config: &Config) -> Self {
        let chat = &config.chat;
        Self {
            default_provider: chat.default_provider,
            default_model: chat.default_model.clone(),
            max_tokens: chat.max_tokens,
            temperature: chat.temperature,
            system_prompt: chat.system_prompt.clone().filter(|s| !s.trim().is_empty()),
            history: chat.history.clone(),
            request_timeout: Duration::from_secs(chat.request_timeout_secs.max(1)),
        }
    }
}

/// A single message in the transcript.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
    pub timestamp: String,
}

impl TranscriptEntry {
    fn new(role: Role, text: String, image: Option<ImageAttachment>) -> Self {
        Self {
            role,
            text,
            image,
            timestamp: crate::util::timestamp(),
        }
    }

    fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.text.clone(),
            image: self.image.clone(),
        }
    }
}

/// Ordered messages of one active session, optionally capped.
#[derive(Debug, Clone, Default)]
pub struct ChatTranscript {
    entries: VecDeque<TranscriptEntry>,
    limit: Option<usize>,
    overflow: HistoryOverflow,
}

impl ChatTranscript {
    pub fn new(history: &HistoryConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: history.limit.filter(|l| *l > 0),
            overflow: history.overflow,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Fail when `additional` more entries would exceed a rejecting limit.
    fn ensure_room(&self, additional: usize) -> Result<(), ChatError> {
        match (self.limit, self.overflow) {
            (Some(limit), HistoryOverflow::Reject) if self.entries.len() + additional > limit => {
                Err(ChatError::TranscriptFull(limit))
            }
            _ => Ok(()),
        }
    }

    fn push(&mut self, entry: TranscriptEntry) -> Result<(), ChatError> {
        self.ensure_room(1)?;
        if let Some(limit) = self.limit {
            while self.entries.len() >= limit {
                self.entries.pop_front();
            }
        }
        self.entries.push_back(entry);
        Ok(())
    }
}

/// The chat unlocked by a successful login: transcript, provider and model.
#[derive(Debug, Clone)]
pub struct ChatSession {
    transcript: ChatTranscript,
    provider: Provider,
    model: Option<ModelInfo>,
    settings: ChatSettings,
}

impl ChatSession {
    pub fn new(settings: ChatSettings, catalog: &ModelCatalog) -> Self {
        let provider = settings.default_provider;
        let model = catalog
            .resolve_id(&settings.default_model)
            .ok()
            .filter(|m| m.provider == provider)
            .or_else(|| catalog.default_for(provider));
        Self {
            transcript: ChatTranscript::new(&settings.history),
            provider,
            model,
            settings,
        }
    }

    pub fn transcript(&self) -> &ChatTranscript {
        &self.transcript
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> Option<&ModelInfo> {
        self.model.as_ref()
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Switch provider. A model from another provider is replaced by the new
    /// provider's first model.
    pub fn select_provider(&mut self, provider: Provider, catalog: &ModelCatalog) {
        self.provider = provider;
        if self.model.as_ref().is_some_and(|m| m.provider != provider) {
            self.model = catalog.default_for(provider);
        }
    }

    /// Select a catalog row. Category headers leave the current model in place.
    pub fn select_model(
        &mut self,
        catalog: &ModelCatalog,
        entry: &CatalogEntry,
    ) -> Result<&ModelInfo, ChatError> {
        let info = catalog.resolve_entry(entry)?;
        self.set_model(info)
    }

    pub fn select_model_id(&mut self, catalog: &ModelCatalog, id: &str) -> Result<&ModelInfo, ChatError> {
        let info = catalog.resolve_id(id)?;
        self.set_model(info)
    }

    fn set_model(&mut self, info: ModelInfo) -> Result<&ModelInfo, ChatError> {
        if info.provider != self.provider {
            return Err(ChatError::ProviderMismatch {
                model: info.id,
                provider: self.provider.display_name().to_string(),
            });
        }
        debug!("Selected model {}", info.id);
        let model: &ModelInfo = self.model.insert(info);
        Ok(model)
    }

    /// Append the user's message to the transcript.
    pub fn append_user_message(
        &mut self,
        text: &str,
        image: Option<ImageAttachment>,
    ) -> Result<(), ChatError> {
        if text.trim().is_empty() && image.is_none() {
            return Err(ChatError::EmptyMessage);
        }
        self.transcript
            .push(TranscriptEntry::new(Role::User, text.trim().to_string(), image))
    }

    /// Check everything the outbound call needs, append the user message and
    /// build the request. Nothing is appended when a check fails.
    pub fn submit(
        &mut self,
        text: &str,
        image: Option<ImageAttachment>,
        api_key: &str,
    ) -> Result<CompletionRequest, ChatError> {
        if text.trim().is_empty() && image.is_none() {
            return Err(ChatError::EmptyMessage);
        }
        let model = self.model.as_ref().ok_or(ChatError::NoModelSelected)?;
        if api_key.trim().is_empty() {
            return Err(ChatError::NoApiKey(self.provider.display_name().to_string()));
        }
        if image.is_some() && !model.vision {
            return Err(ChatError::VisionUnsupported(model.id.clone()));
        }
        // Room for the message and its reply.
        self.transcript.ensure_room(2)?;

        self.append_user_message(text, image)?;
        self.build_request(api_key)
    }

    /// Request carrying the whole transcript, preceded by the system prompt.
    pub fn build_request(&self, api_key: &str) -> Result<CompletionRequest, ChatError> {
        let model = self.model.as_ref().ok_or(ChatError::NoModelSelected)?;
        let mut messages = Vec::with_capacity(self.transcript.len() + 1);
        if let Some(prompt) = &self.settings.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.extend(self.transcript.entries().map(TranscriptEntry::to_message));

        Ok(CompletionRequest {
            model: model.id.clone(),
            messages,
            api_key: api_key.trim().to_string(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        })
    }

    /// Append the finished assistant reply.
    pub fn commit_reply(&mut self, text: String) {
        if text.is_empty() {
            debug!("Provider returned an empty reply, nothing committed");
            return;
        }
        if let Err(e) = self
            .transcript
            .push(TranscriptEntry::new(Role::Assistant, text, None))
        {
            debug!("Reply not committed: {}", e);
        }
    }

    /// Drop all messages.
    pub fn clear(&mut self) {
        self.transcript.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(history: HistoryConfig) -> ChatSession {
        let settings = ChatSettings {
            history,
            ..ChatSettings::default()
        };
        ChatSession::new(settings, &ModelCatalog::builtin())
    }

    #[test]
    fn test_new_session_uses_default_model() {
        let session = session_with(HistoryConfig::default());
        assert_eq!(session.provider(), Provider::OpenAi);
        assert_eq!(session.model().unwrap().id, "gpt-4o-mini");
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_submit_without_key_leaves_transcript() {
        let mut session = session_with(HistoryConfig::default());
        let err = session.submit("hello", None, "").unwrap_err();
        assert!(matches!(err, ChatError::NoApiKey(ref p) if p == "OpenAI"));
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_submit_builds_request() {
        let mut session = session_with(HistoryConfig::default());
        let req = session.submit("  hello  ", None, "sk-1").unwrap();
        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.api_key, "sk-1");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].content, "hello");
        assert_eq!(session.transcript().len(), 1);

        session.commit_reply("hi!".into());
        let req = session.submit("again", None, "sk-1").unwrap();
        let roles: Vec<_> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn test_system_prompt_prepended() {
        let settings = ChatSettings {
            system_prompt: Some("Be brief.".into()),
            ..ChatSettings::default()
        };
        let mut session = ChatSession::new(settings, &ModelCatalog::builtin());
        let req = session.submit("hi", None, "sk").unwrap();
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(session.transcript().len(), 1);
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut session = session_with(HistoryConfig::default());
        assert!(matches!(session.submit("   ", None, "sk"), Err(ChatError::EmptyMessage)));
    }

    #[test]
    fn test_image_requires_vision_model() {
        let catalog = ModelCatalog::builtin();
        let mut session = session_with(HistoryConfig::default());
        let img = ImageAttachment::new("image/png", "AAAA");

        session.select_model_id(&catalog, "gpt-3.5-turbo").unwrap();
        assert!(matches!(
            session.submit("what is this", Some(img.clone()), "sk"),
            Err(ChatError::VisionUnsupported(_))
        ));
        assert!(session.transcript().is_empty());

        session.select_model_id(&catalog, "gpt-4o").unwrap();
        let req = session.submit("what is this", Some(img), "sk").unwrap();
        assert!(req.messages[0].image.is_some());
    }

    #[test]
    fn test_category_selection_keeps_model() {
        let catalog = ModelCatalog::builtin();
        let mut session = session_with(HistoryConfig::default());
        let header = CatalogEntry::Category("OpenAI Vision Models".into());
        assert!(matches!(
            session.select_model(&catalog, &header),
            Err(ChatError::CategorySelected(_))
        ));
        assert_eq!(session.model().unwrap().id, "gpt-4o-mini");
    }

    #[test]
    fn test_provider_switch() {
        let catalog = ModelCatalog::builtin();
        let mut session = session_with(HistoryConfig::default());
        assert!(matches!(
            session.select_model_id(&catalog, "claude-opus-4-1"),
            Err(ChatError::ProviderMismatch { .. })
        ));

        session.select_provider(Provider::Anthropic, &catalog);
        assert_eq!(session.model().unwrap().provider, Provider::Anthropic);
        session.select_model_id(&catalog, "claude-opus-4-1").unwrap();
        assert_eq!(session.model().unwrap().id, "claude-opus-4-1");
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut session = session_with(HistoryConfig {
            limit: Some(3),
            overflow: HistoryOverflow::EvictOldest,
        });
        for i in 0..5 {
            session.submit(&format!("msg {i}"), None, "sk").unwrap();
        }
        let texts: Vec<_> = session.transcript().entries().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn test_history_reject() {
        let mut session = session_with(HistoryConfig {
            limit: Some(2),
            overflow: HistoryOverflow::Reject,
        });
        session.submit("one", None, "sk").unwrap();
        session.commit_reply("reply".into());
        assert!(matches!(
            session.submit("two", None, "sk"),
            Err(ChatError::TranscriptFull(2))
        ));
        assert_eq!(session.transcript().len(), 2);

        session.clear();
        assert!(session.submit("three", None, "sk").is_ok());
    }
}
