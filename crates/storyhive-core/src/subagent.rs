use std::sync::Arc;

use anyhow::Result;
use storyhive_bus::BusPublisher;
use storyhive_provider::LlmMessage;
use storyhive_schema::{AgentRole, EngineEvent};
use tokio_stream::StreamExt;

use super::completion::{CompletionService, TurnEvent, TurnRequest};
use super::context::ContextBuilder;
use super::history::SharedHistory;
use super::persona::PromptLibrary;
use super::tool::{ToolContext, ToolRegistry};

#[derive(Debug, Clone)]
pub struct SubAgentRequest {
    pub role: AgentRole,
    pub task: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubAgentResult {
    pub role: AgentRole,
    pub output: String,
    pub steps: usize,
    pub budget_exhausted: bool,
}

/// Runs a delegated turn for one persona.
///
/// The persona sees the environment, the shared transcript and its task as
/// a single user message, works with the restricted tool set, and its final
/// text is appended to the shared history.
pub struct SubAgentRunner {
    completion: CompletionService,
    prompts: PromptLibrary,
    context: Arc<ContextBuilder>,
    history: SharedHistory,
    tools: Arc<ToolRegistry>,
    publisher: BusPublisher,
    model: String,
    max_tokens: u32,
    max_steps: usize,
}

impl SubAgentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        completion: CompletionService,
        prompts: PromptLibrary,
        context: Arc<ContextBuilder>,
        history: SharedHistory,
        tools: Arc<ToolRegistry>,
        publisher: BusPublisher,
        model: String,
        max_tokens: u32,
        max_steps: usize,
    ) -> Self {
        Self {
            completion,
            prompts,
            context,
            history,
            tools,
            publisher,
            model,
            max_tokens,
            max_steps,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.names()
    }

    pub async fn run(&self, req: SubAgentRequest) -> Result<SubAgentResult> {
        let role = req.role;
        tracing::info!(agent = %role, "delegating to sub-agent");
        self.publisher
            .publish(EngineEvent::Transfer { to: role })
            .await?;

        let system = self.prompts.resolve(role).await?;
        let transcript = self.history.snapshot().await;
        let payload = self.context.build_full_context(&req.task, &transcript).await?;

        let request = TurnRequest {
            model: self.model.clone(),
            system,
            messages: vec![LlmMessage::user(payload)],
            max_tokens: self.max_tokens,
            max_steps: self.max_steps,
        };
        let mut stream =
            self.completion
                .stream_turn(request, Arc::clone(&self.tools), ToolContext::new(role));

        let mut output = String::new();
        let mut steps = 0;
        let mut budget_exhausted = false;
        while let Some(event) = stream.next().await {
            match event? {
                TurnEvent::TextDelta(text) => {
                    output.push_str(&text);
                    self.publisher
                        .publish(EngineEvent::SubAgentStream { agent: role, text })
                        .await?;
                }
                TurnEvent::ToolCall { name, .. } => {
                    self.publisher
                        .publish(EngineEvent::ToolCall { agent: role, name })
                        .await?;
                }
                TurnEvent::ToolResult { name, is_error, .. } => {
                    tracing::debug!(agent = %role, tool = %name, is_error, "sub-agent tool finished");
                }
                TurnEvent::Finished {
                    steps: n,
                    budget_exhausted: exhausted,
                } => {
                    steps = n;
                    budget_exhausted = exhausted;
                }
            }
        }

        self.history.push_assistant(role, output.clone()).await;
        self.publisher
            .publish(EngineEvent::SubAgentEnd { agent: role })
            .await?;
        tracing::info!(agent = %role, steps, budget_exhausted, "sub-agent finished");

        Ok(SubAgentResult {
            role,
            output,
            steps,
            budget_exhausted,
        })
    }
}
