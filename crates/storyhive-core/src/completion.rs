//! Tool-use loop over a streaming provider.
//!
//! One turn is a sequence of model steps. Each step streams text, then the
//! final chunk's tool-use blocks are executed in order and fed back as a
//! single tool-result message. The turn ends on a step with no tool use or
//! once `max_steps` model calls have been made.

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use futures_core::Stream;
use storyhive_provider::{ContentBlock, LlmMessage, LlmProvider, LlmRequest};
use tokio_stream::StreamExt;

use crate::tool::{ToolContext, ToolError, ToolOutput, ToolRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    TextDelta(String),
    /// Emitted before the tool executes.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        content: String,
        is_error: bool,
    },
    Finished {
        steps: usize,
        budget_exhausted: bool,
    },
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<LlmMessage>,
    pub max_tokens: u32,
    pub max_steps: usize,
}

pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnEvent>> + Send>>;

#[derive(Clone)]
pub struct CompletionService {
    provider: Arc<dyn LlmProvider>,
}

impl CompletionService {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider)
    }

    /// Lazily runs one turn. Nothing happens until the stream is polled.
    pub fn stream_turn(
        &self,
        request: TurnRequest,
        tools: Arc<ToolRegistry>,
        ctx: ToolContext,
    ) -> TurnStream {
        Box::pin(turn_stream(Arc::clone(&self.provider), request, tools, ctx))
    }
}

fn turn_stream(
    provider: Arc<dyn LlmProvider>,
    request: TurnRequest,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
) -> impl Stream<Item = Result<TurnEvent>> + Send {
    async_stream::try_stream! {
        let TurnRequest { model, system, mut messages, max_tokens, max_steps } = request;
        let max_steps = max_steps.max(1);
        let tool_defs = tools.tool_defs();
        let mut step = 0usize;

        loop {
            step += 1;
            tracing::debug!(agent = %ctx.agent(), step, "starting model step");

            let llm_request = LlmRequest {
                model: model.clone(),
                system: Some(system.clone()),
                messages: messages.clone(),
                max_tokens,
                tools: tool_defs.clone(),
            };
            let mut chunks = provider.stream(llm_request).await?;

            let mut text = String::new();
            let mut blocks = Vec::new();
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                if !chunk.delta.is_empty() {
                    text.push_str(&chunk.delta);
                    yield TurnEvent::TextDelta(chunk.delta);
                }
                if chunk.is_final {
                    blocks = chunk.content_blocks;
                }
            }

            let tool_uses: Vec<(String, String, serde_json::Value)> = blocks
                .into_iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
                    _ => None,
                })
                .collect();

            if tool_uses.is_empty() {
                yield TurnEvent::Finished { steps: step, budget_exhausted: false };
                break;
            }

            let mut assistant_content = Vec::with_capacity(tool_uses.len() + 1);
            if !text.is_empty() {
                assistant_content.push(ContentBlock::Text { text });
            }
            for (id, name, input) in &tool_uses {
                assistant_content.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
            }
            messages.push(LlmMessage {
                role: "assistant".into(),
                content: assistant_content,
            });

            let mut results = Vec::with_capacity(tool_uses.len());
            for (id, name, input) in tool_uses {
                yield TurnEvent::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                };

                let output = settle(&name, tools.execute(&name, input, &ctx).await)?;
                yield TurnEvent::ToolResult {
                    id: id.clone(),
                    name,
                    content: output.content.clone(),
                    is_error: output.is_error,
                };
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: output.content,
                    is_error: output.is_error,
                });
            }
            messages.push(LlmMessage {
                role: "user".into(),
                content: results,
            });

            if step >= max_steps {
                tracing::warn!(agent = %ctx.agent(), max_steps, "step budget exhausted, ending turn");
                yield TurnEvent::Finished { steps: step, budget_exhausted: true };
                break;
            }
        }
    }
}

/// Folds reportable tool failures into an error result for the model.
fn settle(name: &str, result: Result<ToolOutput, ToolError>) -> Result<ToolOutput> {
    match result {
        Ok(output) => Ok(output),
        Err(e) if e.is_reportable() => {
            tracing::warn!(tool = name, error = %e, "tool rejected call");
            Ok(ToolOutput::error(e.to_string()))
        }
        Err(ToolError::Upstream(e)) => Err(e.context(format!("tool {name} failed"))),
        Err(e) => Err(anyhow::Error::new(e).context(format!("tool {name} failed"))),
    }
}
