use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use storyhive_schema::AgentRole;
use storyhive_store::RecordStore;

/// System prompt used when no template is configured for an agent.
pub const MISCONFIGURED_PROMPT: &str = "This agent is misconfigured: no system prompt \
template is configured for it. Reply only that the agent is misconfigured and that an \
operator must set its prompt template. Do not call any tools.";

pub fn prompt_code(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Main => "outline_agent.main",
        AgentRole::StorylineAuthor => "outline_agent.ai1",
        AgentRole::OutlineAuthor => "outline_agent.ai2",
        AgentRole::Director => "outline_agent.director",
    }
}

/// One-line job description, used for the delegation tool definitions.
pub fn persona_description(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Main => "Coordinates the adaptation and talks to the user.",
        AgentRole::StorylineAuthor => {
            "Storyline author. Reads chapters and writes or revises the overall storyline."
        }
        AgentRole::OutlineAuthor => {
            "Outline author. Turns the storyline and chapters into episode outlines."
        }
        AgentRole::Director => {
            "Director. Reviews storyline and outlines for pacing and hooks and revises them."
        }
    }
}

/// Resolves agent system prompts from the prompt template collection.
#[derive(Clone)]
pub struct PromptLibrary {
    store: Arc<dyn RecordStore>,
}

impl PromptLibrary {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Custom value, else default value, else [`MISCONFIGURED_PROMPT`].
    pub async fn resolve(&self, role: AgentRole) -> Result<String> {
        let code = prompt_code(role);
        let template = self.store.prompt_template(code).await?;
        match template.as_ref().and_then(|t| t.effective_value()) {
            Some(value) => Ok(value.to_string()),
            None => {
                tracing::warn!(code, "prompt template missing, using misconfigured sentinel");
                Ok(MISCONFIGURED_PROMPT.to_string())
            }
        }
    }

    pub async fn set_custom(&self, code: &str, value: Option<&str>) -> Result<()> {
        self.store.set_prompt_custom(code, value).await
    }

    /// Seeds default values from `<dir>/<code>.md`. Custom values are left
    /// alone. Returns the number of templates imported.
    pub async fn import_defaults(&self, dir: &Path) -> Result<usize> {
        let mut imported = 0;
        for role in [AgentRole::Main].into_iter().chain(AgentRole::SUB_AGENTS) {
            let code = prompt_code(role);
            let path = dir.join(format!("{code}.md"));
            if !path.exists() {
                tracing::debug!(code, path = %path.display(), "no default prompt file");
                continue;
            }
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read prompt file: {}", path.display()))?;
            self.store.set_prompt_default(code, body.trim()).await?;
            imported += 1;
        }
        tracing::info!(imported, dir = %dir.display(), "imported default prompts");
        Ok(imported)
    }
}
