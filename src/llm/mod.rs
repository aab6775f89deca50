//! Language model capability used by the cost router.
//!
//! The core only depends on the [`LlmProvider`] shape: a model id goes in,
//! generated text and a token-usage report come out. Vendor request formats stay
//! inside individual providers (OpenRouter is the bundled one).

mod error;
mod openrouter;

pub use error::{LlmError, LlmErrorKind, RetryConfig};
pub use openrouter::OpenRouterProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A plain-text chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Token usage reported by a provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    pub fn total(&self) -> u64 {
        self.input.saturating_add(self.output)
    }

    /// Component-wise sum.
    pub fn add(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage::new(
            self.input.saturating_add(other.input),
            self.output.saturating_add(other.output),
        )
    }
}

/// Result of a non-streaming generation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// One item of a streamed generation.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    /// Final usage report. Providers emit it once, after the last text chunk.
    Usage(TokenUsage),
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, LlmError>>;

/// Trait for language model providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a full completion.
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<Completion, LlmError>;

    /// Stream a completion.
    ///
    /// Default implementation calls `generate` and yields the text as a single
    /// chunk followed by the usage report.
    async fn stream(&self, model: &str, messages: &[ChatMessage]) -> Result<ChunkStream, LlmError> {
        let completion = self.generate(model, messages).await?;
        let chunks = vec![
            Ok(StreamChunk::Text(completion.text)),
            Ok(StreamChunk::Usage(completion.usage)),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl LlmProvider for Echo {
        async fn generate(
            &self,
            _model: &str,
            messages: &[ChatMessage],
        ) -> Result<Completion, LlmError> {
            let text = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Completion {
                text,
                usage: TokenUsage::new(3, 4),
            })
        }
    }

    #[tokio::test]
    async fn test_default_stream_yields_text_then_usage() {
        let stream = Echo.stream("m", &[ChatMessage::user("hi")]).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::Text("hi".into()));
        assert_eq!(
            chunks[1].as_ref().unwrap(),
            &StreamChunk::Usage(TokenUsage::new(3, 4))
        );
    }

    #[test]
    fn test_usage_add_and_total() {
        let a = TokenUsage::new(10, 5);
        let b = TokenUsage::new(1, 2);
        assert_eq!(a.add(&b), TokenUsage::new(11, 7));
        assert_eq!(a.total(), 15);
    }
}
