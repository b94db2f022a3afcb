pub mod scripted;
pub mod types;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_core::Stream;
use tokio_stream::iter as stream_iter;

pub use scripted::{ScriptedProvider, ScriptedReply};
pub use types::*;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Providers without native streaming replay the full response as one
    /// text chunk followed by the final chunk.
    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        let resp = self.chat(request).await?;
        let mut chunks = Vec::new();
        if !resp.text.is_empty() {
            chunks.push(Ok(StreamChunk::text(resp.text.clone())));
        }
        let mut last = StreamChunk::finish(
            resp.stop_reason.as_deref().unwrap_or("end_turn"),
            resp.content,
        );
        last.input_tokens = resp.input_tokens;
        last.output_tokens = resp.output_tokens;
        chunks.push(Ok(last));
        Ok(Box::pin(stream_iter(chunks)))
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// Provider Registry
// ============================================================

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("provider not found: {id}"))
    }

    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

/// Offline provider that echoes the last user message word by word.
pub struct StubProvider;

impl StubProvider {
    fn reply_text(request: &LlmRequest) -> String {
        let user_text = request
            .messages
            .last()
            .map(|m| m.text())
            .unwrap_or_default();
        format!("[stub:{}] {}", request.model, user_text)
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let text = Self::reply_text(&request);
        tracing::debug!(model = %request.model, "stub provider chat");
        Ok(LlmResponse {
            text: text.clone(),
            content: vec![ContentBlock::Text { text }],
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }

    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        let text = Self::reply_text(&request);
        tracing::debug!(model = %request.model, "stub provider stream");
        let mut chunks: Vec<Result<StreamChunk>> = text
            .split_inclusive(' ')
            .map(|word| Ok(StreamChunk::text(word)))
            .collect();

        let mut last = StreamChunk::finish("end_turn", vec![ContentBlock::Text { text }]);
        last.input_tokens = Some(10);
        last.output_tokens = Some(20);
        chunks.push(Ok(last));

        Ok(Box::pin(stream_iter(chunks)))
    }
}

pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register("stub", Arc::new(StubProvider));
}
