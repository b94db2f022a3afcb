use std::sync::Arc;

use anyhow::Result;
use storyhive_bus::BusPublisher;
use storyhive_provider::LlmProvider;
use storyhive_schema::{AgentRole, EngineEvent};
use storyhive_store::RecordStore;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

use super::completion::{CompletionService, TurnEvent, TurnRequest};
use super::config::StoryhiveConfig;
use super::context::{ChapterSource, ContextBuilder};
use super::history::SharedHistory;
use super::narrative::NarrativeManager;
use super::narrative_tools::{register_narrative_tools, SUB_AGENT_TOOLS};
use super::persona::PromptLibrary;
use super::subagent::SubAgentRunner;
use super::subagent_tool::SubAgentTool;
use super::tool::{ToolContext, ToolRegistry};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: String,
    pub max_tokens: u32,
    pub max_steps: usize,
    pub sub_agent_max_steps: usize,
}

impl EngineSettings {
    pub fn from_config(config: &StoryhiveConfig) -> Self {
        Self {
            model: config.model.model.clone(),
            max_tokens: config.model.max_tokens,
            max_steps: config.engine.max_steps,
            sub_agent_max_steps: config.engine.sub_agent_max_steps,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: "stub-model".into(),
            max_tokens: 4096,
            max_steps: 20,
            sub_agent_max_steps: 10,
        }
    }
}

/// Drives one conversation about one project.
///
/// Each [`Orchestrator::call`] runs a top-level turn over the full tool
/// catalog. Delegation tools run nested turns for the personas, which share
/// this instance's history. Progress is published on the injected bus.
pub struct Orchestrator {
    completion: CompletionService,
    prompts: PromptLibrary,
    context: Arc<ContextBuilder>,
    history: SharedHistory,
    tools: Arc<ToolRegistry>,
    narrative: Arc<NarrativeManager>,
    publisher: BusPublisher,
    settings: EngineSettings,
    turn: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn RecordStore>,
        chapters: Arc<dyn ChapterSource>,
        project_id: i64,
        publisher: BusPublisher,
        settings: EngineSettings,
    ) -> Self {
        let completion = CompletionService::new(provider);
        let history = SharedHistory::new();
        let prompts = PromptLibrary::new(Arc::clone(&store));
        let context = Arc::new(ContextBuilder::new(
            Arc::clone(&store),
            Arc::clone(&chapters),
            project_id,
        ));
        let narrative = Arc::new(NarrativeManager::new(store, project_id, publisher.clone()));

        let mut tools = ToolRegistry::new();
        register_narrative_tools(&mut tools, Arc::clone(&narrative), chapters);

        let runner = Arc::new(SubAgentRunner::new(
            completion.clone(),
            prompts.clone(),
            Arc::clone(&context),
            history.clone(),
            Arc::new(tools.subset(&SUB_AGENT_TOOLS)),
            publisher.clone(),
            settings.model.clone(),
            settings.max_tokens,
            settings.sub_agent_max_steps,
        ));
        for role in AgentRole::SUB_AGENTS {
            tools.register(Arc::new(SubAgentTool::new(role, Arc::clone(&runner))));
        }

        Self {
            completion,
            prompts,
            context,
            history,
            tools: Arc::new(tools),
            narrative,
            publisher,
            settings,
            turn: Mutex::new(()),
        }
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    pub fn narrative(&self) -> &Arc<NarrativeManager> {
        &self.narrative
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.names()
    }

    /// Runs one top-level turn and returns the main agent's reply.
    ///
    /// On error, whatever was appended to the history before the failure
    /// stays there, and the instance can be called again.
    pub async fn call(&self, user_message: &str) -> Result<String> {
        let _turn = self.turn.lock().await;
        tracing::info!(project_id = self.narrative.project_id(), "turn started");

        self.history.push_user(user_message).await;

        let environment = self.context.build_environment().await?;
        let template = self.prompts.resolve(AgentRole::Main).await?;
        let request = TurnRequest {
            model: self.settings.model.clone(),
            system: format!("{template}\n\n{environment}"),
            messages: self.history.to_messages().await,
            max_tokens: self.settings.max_tokens,
            max_steps: self.settings.max_steps,
        };

        let mut stream = self.completion.stream_turn(
            request,
            Arc::clone(&self.tools),
            ToolContext::new(AgentRole::Main),
        );

        let mut reply = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                TurnEvent::TextDelta(text) => {
                    reply.push_str(&text);
                    self.publisher.publish(EngineEvent::Data { text }).await?;
                }
                TurnEvent::ToolCall { name, .. } => {
                    tracing::debug!(tool = %name, "main agent tool call");
                    self.publisher
                        .publish(EngineEvent::ToolCall {
                            agent: AgentRole::Main,
                            name,
                        })
                        .await?;
                }
                TurnEvent::ToolResult { name, is_error, .. } => {
                    tracing::debug!(tool = %name, is_error, "main agent tool finished");
                }
                TurnEvent::Finished {
                    steps,
                    budget_exhausted,
                } => {
                    tracing::info!(steps, budget_exhausted, "turn finished");
                }
            }
        }

        self.history.push_assistant(AgentRole::Main, reply.clone()).await;
        self.publisher
            .publish(EngineEvent::Response {
                text: reply.clone(),
            })
            .await?;
        Ok(reply)
    }
}
