use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::data_model::Embedding;
use crate::errors::QueryCoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// `Some("json_object")` when the prompt demands strict JSON.
    pub response_format: Option<String>,
}

/// External chat-completion capability: `Chat(messages, params) -> {text | stream of tokens}`.
/// The query core treats the model itself as an external collaborator (spec.md §1);
/// this trait is the seam, matching `graph_rag`'s `async_trait`-based client traits.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage], params: &ChatParams) -> QueryCoreResult<String>;

    /// Token-stream generation. Default falls back to a single-chunk stream over `generate`.
    async fn stream_generate(
        &self,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> QueryCoreResult<BoxStream<'static, QueryCoreResult<String>>> {
        let full = self.generate(messages, params).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(full) })))
    }
}

/// External embedding capability: `Embed(text) -> vector`.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> QueryCoreResult<Embedding>;
}
