use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use super::ChatSession;
use crate::error::{ChatError, ProviderError};
use crate::provider::LlmProvider;
use crate::types::CompletionRequest;

/// Incremental reply text. Finite, single use.
pub type ReplyStream<'a> = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send + 'a>>;

/// Anything holding the chat a finished reply lands in.
#[async_trait]
pub trait ReplyTarget: Send {
    async fn commit_reply(&mut self, text: String);
}

#[async_trait]
impl ReplyTarget for ChatSession {
    async fn commit_reply(&mut self, text: String) {
        ChatSession::commit_reply(self, text)
    }
}

#[async_trait]
impl<T: ReplyTarget + ?Sized> ReplyTarget for &mut T {
    async fn commit_reply(&mut self, text: String) {
        (**self).commit_reply(text).await
    }
}

/// Send a prepared request and stream the reply back.
///
/// The concatenated reply is committed to the session only after the provider
/// finishes. An error ends the stream with nothing committed, and so does
/// dropping the stream early, which also drops the outbound request.
/// `timeout` bounds the wait for the response and for each following chunk.
pub fn send_to_provider<'a, T>(
    mut target: T,
    provider: Arc<dyn LlmProvider>,
    request: CompletionRequest,
    timeout: Duration,
) -> ReplyStream<'a>
where
    T: ReplyTarget + 'a,
{
    Box::pin(async_stream::stream! {
        let secs = timeout.as_secs();
        debug!("Sending {} message(s) to {} model {}", request.messages.len(), provider.kind(), request.model);

        let mut chunks = match tokio::time::timeout(timeout, provider.chat_stream(&request)).await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                warn!("{} request failed: {}", provider.kind(), e);
                yield Err(ChatError::from(e));
                return;
            }
            Err(_) => {
                warn!("{} request timed out after {}s", provider.kind(), secs);
                yield Err(ChatError::from(ProviderError::Timeout(secs)));
                return;
            }
        };

        let mut reply = String::new();
        loop {
            match tokio::time::timeout(timeout, chunks.next()).await {
                Ok(Some(Ok(text))) => {
                    reply.push_str(&text);
                    yield Ok(text);
                }
                Ok(Some(Err(e))) => {
                    warn!("{} stream failed: {}", provider.kind(), e);
                    yield Err(ChatError::from(e));
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("{} stream stalled for {}s", provider.kind(), secs);
                    yield Err(ChatError::from(ProviderError::Timeout(secs)));
                    return;
                }
            }
        }

        debug!("Reply complete ({} chars)", reply.len());
        target.commit_reply(reply).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use crate::provider::{ChunkStream, LlmProvider};
    use crate::session::ChatSettings;
    use crate::types::{Provider, Role};
    use async_trait::async_trait;

    struct Scripted {
        chunks: Vec<Result<&'static str, u16>>,
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn chat_stream(&self, _request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
            let items: Vec<Result<String, ProviderError>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Ok(s) => Ok(s.to_string()),
                    Err(status) => Err(ProviderError::Api { status: *status, message: "boom".into() }),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }

        fn kind(&self) -> Provider {
            Provider::OpenAi
        }
    }

    struct Stalled;

    #[async_trait]
    impl LlmProvider for Stalled {
        async fn chat_stream(&self, _request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
            Ok(Box::pin(futures::stream::pending()))
        }

        fn kind(&self) -> Provider {
            Provider::OpenAi
        }
    }

    fn session() -> ChatSession {
        ChatSession::new(ChatSettings::default(), &ModelCatalog::builtin())
    }

    #[tokio::test]
    async fn test_reply_committed_on_completion() {
        let mut chat = session();
        let request = chat.submit("hi", None, "sk").unwrap();
        let provider = Arc::new(Scripted { chunks: vec![Ok("Hel"), Ok("lo")] });

        let chunks: Vec<_> = send_to_provider(&mut chat, provider, request, Duration::from_secs(5))
            .collect()
            .await;
        assert_eq!(chunks.len(), 2);

        let last = chat.transcript().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text, "Hello");
    }

    #[tokio::test]
    async fn test_error_commits_nothing() {
        let mut chat = session();
        let request = chat.submit("hi", None, "sk").unwrap();
        let provider = Arc::new(Scripted { chunks: vec![Ok("partial"), Err(429)] });

        let chunks: Vec<_> = send_to_provider(&mut chat, provider, request, Duration::from_secs(5))
            .collect()
            .await;
        assert!(chunks.last().unwrap().is_err());
        assert_eq!(chat.transcript().len(), 1);
        assert_eq!(chat.transcript().last().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_dropped_stream_commits_nothing() {
        let mut chat = session();
        let request = chat.submit("hi", None, "sk").unwrap();
        let provider = Arc::new(Scripted { chunks: vec![Ok("a"), Ok("b")] });
        {
            let mut stream = send_to_provider(&mut chat, provider, request, Duration::from_secs(5));
            assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        }
        assert_eq!(chat.transcript().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let mut chat = session();
        let request = chat.submit("hi", None, "sk").unwrap();

        let chunks: Vec<_> =
            send_to_provider(&mut chat, Arc::new(Stalled), request, Duration::from_secs(3))
                .collect()
                .await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(
            chunks[0],
            Err(ChatError::Provider(ProviderError::Timeout(3)))
        ));
        assert_eq!(chat.transcript().len(), 1);
    }
}
