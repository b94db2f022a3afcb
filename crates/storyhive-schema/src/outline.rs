//! Episode outline document and its versioned storage payload.
//!
//! The outline is the only input to later script generation, so entity lists
//! keep the order in which entities first appear in the prose.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

pub const OUTLINE_SCHEMA_VERSION: &str = "v1";

/// A named character, prop or scene with its description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlineEntity {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterRange {
    pub start: u32,
    pub end: u32,
}

/// Four-stage event sequence of an episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyEvents {
    #[serde(default)]
    pub setup: String,
    #[serde(default)]
    pub development: String,
    #[serde(default)]
    pub turn: String,
    #[serde(default)]
    pub resolution: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeOutline {
    /// Overwritten with the assigned episode number on save.
    #[serde(default)]
    pub episode_index: u32,
    pub title: String,
    #[serde(default)]
    pub chapter_range: ChapterRange,
    #[serde(default)]
    pub core_conflict: String,
    #[serde(default)]
    pub scenes: Vec<OutlineEntity>,
    #[serde(default)]
    pub characters: Vec<OutlineEntity>,
    #[serde(default)]
    pub props: Vec<OutlineEntity>,
    #[serde(default)]
    pub key_events: KeyEvents,
    #[serde(default)]
    pub emotional_curve: String,
    #[serde(default)]
    pub opening_hook: String,
    #[serde(default)]
    pub ending_hook: String,
    #[serde(default)]
    pub highlight_shots: Vec<String>,
    #[serde(default)]
    pub classic_lines: Vec<String>,
}

impl EpisodeOutline {
    /// Human-readable rendering used by the `getOutline` tool.
    pub fn render(&self, episode: u32) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Episode {episode}: {}", self.title);
        let _ = writeln!(
            out,
            "Chapters: {}-{}",
            self.chapter_range.start, self.chapter_range.end
        );
        let _ = writeln!(out, "Core conflict: {}", self.core_conflict);
        let _ = writeln!(out, "Scenes: {}", render_entities(&self.scenes));
        let _ = writeln!(out, "Characters: {}", render_entities(&self.characters));
        let _ = writeln!(out, "Props: {}", render_entities(&self.props));
        out.push_str("Key events:\n");
        let _ = writeln!(out, "  - Setup: {}", self.key_events.setup);
        let _ = writeln!(out, "  - Development: {}", self.key_events.development);
        let _ = writeln!(out, "  - Turn: {}", self.key_events.turn);
        let _ = writeln!(out, "  - Resolution: {}", self.key_events.resolution);
        let _ = writeln!(out, "Emotional curve: {}", self.emotional_curve);
        let _ = writeln!(out, "Opening hook: {}", self.opening_hook);
        let _ = writeln!(out, "Ending hook: {}", self.ending_hook);
        if !self.highlight_shots.is_empty() {
            out.push_str("Highlight shots:\n");
            for shot in &self.highlight_shots {
                let _ = writeln!(out, "  - {shot}");
            }
        }
        if !self.classic_lines.is_empty() {
            out.push_str("Classic lines:\n");
            for line in &self.classic_lines {
                let _ = writeln!(out, "  - {line}");
            }
        }
        out
    }
}

fn render_entities(entities: &[OutlineEntity]) -> String {
    if entities.is_empty() {
        return "-".to_string();
    }
    entities
        .iter()
        .map(|e| {
            if e.description.is_empty() {
                e.name.clone()
            } else {
                format!("{} ({})", e.name, e.description)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Versioned on-disk form of an outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "schema", content = "episode")]
pub enum OutlinePayload {
    #[serde(rename = "v1")]
    V1(EpisodeOutline),
}

impl OutlinePayload {
    pub fn encode(doc: &EpisodeOutline) -> serde_json::Result<String> {
        serde_json::to_string(&OutlinePayload::V1(doc.clone()))
    }

    /// Decodes a stored payload. Untagged documents written before versioning
    /// are accepted as-is; anything unreadable becomes a default document.
    pub fn decode(raw: &str) -> EpisodeOutline {
        if let Ok(OutlinePayload::V1(doc)) = serde_json::from_str::<OutlinePayload>(raw) {
            return doc;
        }
        match serde_json::from_str::<EpisodeOutline>(raw) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("unreadable outline payload, using defaults: {e}");
                EpisodeOutline::default()
            }
        }
    }
}
