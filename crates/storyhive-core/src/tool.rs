//! Tool abstraction shared by the top-level agent and the sub-agents.
//!
//! A tool failure comes in three flavours:
//! - [`ToolError::Validation`]: the model sent bad input. Reported back to
//!   the model as an error tool result; nothing was mutated.
//! - [`ToolError::UnknownTool`]: the model asked for a tool outside its
//!   catalog. Also reported back as an error tool result.
//! - [`ToolError::Upstream`]: the store or a nested turn failed. Propagated
//!   and fatal to the current turn.
//!
//! "Not found" style outcomes are ordinary [`ToolOutput`] text.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use storyhive_provider::ToolDef;
use storyhive_schema::AgentRole;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input for {tool}: {message}")]
    Validation { tool: String, message: String },
    #[error("tool not found: {0}")]
    UnknownTool(String),
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl ToolError {
    pub fn validation(tool: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    /// Whether the model can be told about the failure and keep going.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Upstream(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Who is invoking the tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext {
    agent: AgentRole,
}

impl ToolContext {
    pub fn new(agent: AgentRole) -> Self {
        Self { agent }
    }

    pub fn agent(&self) -> AgentRole {
        self.agent
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definition(&self) -> ToolDef;
    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Deserializes tool input, mapping schema mismatches to a validation error.
pub fn parse_input<T: DeserializeOwned>(tool: &str, input: serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::validation(tool, e.to_string()))
}

/// Named tool catalog. Definitions are listed in registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolExecutor>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ToolExecutor>) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// A new registry holding only the named tools that exist here.
    pub fn subset(&self, names: &[&str]) -> ToolRegistry {
        let mut subset = ToolRegistry::new();
        for name in names {
            if let Some(tool) = self.tools.get(*name) {
                subset.register(Arc::clone(tool));
            }
        }
        subset
    }

    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(input, ctx).await
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
