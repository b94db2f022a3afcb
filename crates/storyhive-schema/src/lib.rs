pub mod outline;

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use outline::*;

/// The agent acting in a turn. `Main` is the top-level conversation agent;
/// the other three are delegation targets.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum AgentRole {
    #[serde(rename = "main")]
    Main,
    /// Writes the storyline (`AI1`).
    #[serde(rename = "AI1")]
    StorylineAuthor,
    /// Writes episode outlines (`AI2`).
    #[serde(rename = "AI2")]
    OutlineAuthor,
    #[serde(rename = "director")]
    Director,
}

impl AgentRole {
    pub const SUB_AGENTS: [AgentRole; 3] = [
        AgentRole::StorylineAuthor,
        AgentRole::OutlineAuthor,
        AgentRole::Director,
    ];

    /// Tag used in events and as the delegation tool name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::StorylineAuthor => "AI1",
            Self::OutlineAuthor => "AI2",
            Self::Director => "director",
        }
    }

    pub fn is_sub_agent(&self) -> bool {
        !matches!(self, Self::Main)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTarget {
    Storyline,
    Outline,
    Assets,
}

/// Progress notifications emitted by the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    Refresh {
        target: RefreshTarget,
    },
    Transfer {
        to: AgentRole,
    },
    /// Emitted before the tool runs. Arguments are intentionally absent.
    ToolCall {
        agent: AgentRole,
        name: String,
    },
    SubAgentStream {
        agent: AgentRole,
        text: String,
    },
    SubAgentEnd {
        agent: AgentRole,
    },
    Data {
        text: String,
    },
    Response {
        text: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub genre: String,
    /// Target visual/narrative style
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    pub project_id: i64,
    /// 1-based position in the novel
    pub index: u32,
    pub volume: u32,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storyline {
    pub id: i64,
    pub project_id: i64,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineRecord {
    pub id: i64,
    pub project_id: i64,
    pub episode: u32,
    pub data: EpisodeOutline,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOutline {
    pub episode: u32,
    pub data: EpisodeOutline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: i64,
    pub project_id: i64,
    pub outline_id: i64,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewScript {
    pub outline_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Character,
    Prop,
    Scene,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Prop => "prop",
            Self::Scene => "scene",
        }
    }
}

impl FromStr for AssetKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(Self::Character),
            "prop" => Ok(Self::Prop),
            "scene" => Ok(Self::Scene),
            other => Err(anyhow!("unknown asset kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub id: i64,
    pub project_id: i64,
    pub kind: AssetKind,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptTemplate {
    pub code: String,
    /// Operator override
    #[serde(default)]
    pub custom_value: Option<String>,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl PromptTemplate {
    /// Custom value if set, otherwise the default. Blank values count as unset.
    pub fn effective_value(&self) -> Option<&str> {
        [self.custom_value.as_deref(), self.default_value.as_deref()]
            .into_iter()
            .flatten()
            .find(|v| !v.trim().is_empty())
    }
}
