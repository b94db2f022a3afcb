use std::sync::Arc;

use storyhive_provider::{ContentBlock, LlmMessage};
use storyhive_schema::AgentRole;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    fn as_role(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub speaker: Speaker,
    /// Set for assistant text produced by a sub-agent.
    pub agent: Option<AgentRole>,
    pub text: String,
}

impl HistoryEntry {
    fn labelled_text(&self) -> String {
        match self.agent {
            Some(agent) if agent.is_sub_agent() => format!("[{agent}] {}", self.text),
            _ => self.text.clone(),
        }
    }
}

/// Conversation history of one engine instance.
///
/// Append-only and shared by handle between the top-level turn and every
/// sub-agent it delegates to. Never persisted.
#[derive(Clone, Default)]
pub struct SharedHistory {
    entries: Arc<Mutex<Vec<HistoryEntry>>>,
}

impl SharedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_user(&self, text: impl Into<String>) {
        self.entries.lock().await.push(HistoryEntry {
            speaker: Speaker::User,
            agent: None,
            text: text.into(),
        });
    }

    pub async fn push_assistant(&self, agent: AgentRole, text: impl Into<String>) {
        self.entries.lock().await.push(HistoryEntry {
            speaker: Speaker::Assistant,
            agent: Some(agent),
            text: text.into(),
        });
    }

    pub async fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Model messages for the current history. Blank entries are skipped and
    /// consecutive entries from the same speaker are merged so roles
    /// alternate.
    pub async fn to_messages(&self) -> Vec<LlmMessage> {
        to_messages(&self.snapshot().await)
    }
}

pub fn to_messages(entries: &[HistoryEntry]) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = Vec::new();
    for entry in entries.iter().filter(|e| !e.text.trim().is_empty()) {
        let role = entry.speaker.as_role();
        let text = entry.labelled_text();
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.push(ContentBlock::Text { text }),
            _ => messages.push(match entry.speaker {
                Speaker::User => LlmMessage::user(text),
                Speaker::Assistant => LlmMessage::assistant(text),
            }),
        }
    }
    messages
}

/// Plain-text transcript used inside sub-agent payloads.
pub fn render_transcript(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "(no conversation yet)".to_string();
    }
    entries
        .iter()
        .filter(|e| !e.text.trim().is_empty())
        .map(|e| match (e.speaker, e.agent) {
            (Speaker::User, _) => format!("user: {}", e.text),
            (Speaker::Assistant, Some(agent)) if agent.is_sub_agent() => {
                format!("assistant ({agent}): {}", e.text)
            }
            (Speaker::Assistant, _) => format!("assistant: {}", e.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
