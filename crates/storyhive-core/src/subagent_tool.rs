use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use storyhive_provider::ToolDef;
use storyhive_schema::AgentRole;

use super::persona::persona_description;
use super::subagent::{SubAgentRequest, SubAgentRunner};
use super::tool::{parse_input, ToolContext, ToolError, ToolExecutor, ToolOutput};

/// Delegation tool for one persona, named after its tag (`AI1`, `AI2`,
/// `director`).
pub struct SubAgentTool {
    role: AgentRole,
    runner: Arc<SubAgentRunner>,
}

impl SubAgentTool {
    pub fn new(role: AgentRole, runner: Arc<SubAgentRunner>) -> Self {
        Self { role, runner }
    }
}

#[derive(Deserialize)]
struct DelegateInput {
    task: String,
}

#[async_trait]
impl ToolExecutor for SubAgentTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: self.role.as_str().into(),
            description: format!(
                "{} Runs with the current conversation as context and returns its final reply.",
                persona_description(self.role)
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "task": {
                        "type": "string",
                        "description": "What the sub-agent should do"
                    }
                },
                "required": ["task"]
            }),
        }
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.role.as_str();
        let input: DelegateInput = parse_input(tool, input)?;
        if input.task.trim().is_empty() {
            return Err(ToolError::validation(tool, "task must not be empty"));
        }

        let result = self
            .runner
            .run(SubAgentRequest {
                role: self.role,
                task: input.task,
            })
            .await?;

        if result.output.trim().is_empty() {
            return Ok(ToolOutput::text(format!("{tool} finished without a reply.")));
        }
        Ok(ToolOutput::text(result.output))
    }
}
