//! Deterministic stub `ChatModel`/`EmbeddingModel` implementations for tests --
//! these never perform network calls, the same fixture-over-mock style
//! `vector_rag`'s service tests use for its vector store.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::data_model::Embedding;
use crate::errors::QueryCoreResult;
use crate::llm::{ChatMessage, ChatModel, ChatParams, EmbeddingModel};

/// Echoes a fixed response regardless of input; useful for asserting on context
/// construction without depending on model behavior.
pub struct StubChatModel {
    pub response: String,
}

impl StubChatModel {
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into() }
    }
}

#[async_trait]
impl ChatModel for StubChatModel {
    async fn generate(&self, _messages: &[ChatMessage], _params: &ChatParams) -> QueryCoreResult<String> {
        Ok(self.response.clone())
    }
}

/// Deterministic bag-of-characters embedding: stable across runs, good enough to
/// exercise cosine ranking without a real embedding model.
pub struct StubEmbeddingModel {
    pub dim: usize,
}

impl StubEmbeddingModel {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl EmbeddingModel for StubEmbeddingModel {
    async fn embed(&self, text: &str) -> QueryCoreResult<Embedding> {
        let mut v = vec![0.0f32; self.dim];
        for (i, byte) in text.bytes().enumerate() {
            v[i % self.dim] += byte as f32;
        }
        Ok(v)
    }
}

/// Returns one scripted response per call, in call order, then repeats the last
/// response for any calls past the end of the script. `futures::future::join_all`
/// preserves the order its input futures were created in, so tests that fan
/// `generate` calls out concurrently can still script them by call index.
pub struct ScriptedChatModel {
    responses: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedChatModel {
    pub fn new(responses: Vec<String>) -> Self {
        Self { responses, calls: AtomicUsize::new(0) }
    }

    /// Number of `generate` calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn generate(&self, _messages: &[ChatMessage], _params: &ChatParams) -> QueryCoreResult<String> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .responses
            .get(index)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default())
    }
}
