use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use storyhive_schema::{Chapter, Project};
use storyhive_store::RecordStore;

use crate::history::{render_transcript, HistoryEntry};

pub const NO_PROJECT_INFO: &str = "No project information available.";

/// Fixed description of the operations the main agent can call.
pub const TOOL_CATALOG: &str = "\
- getChapter(chapters): read chapters by number
- getStoryline(): read the current storyline
- saveStoryline(content): create or replace the storyline
- deleteStoryline(): remove the storyline
- getOutline(simplified): list saved episodes, or render them in full
- saveOutline(episodes, overwrite, startEpisode?): save episode outlines
- updateOutline(id, episode): replace one saved episode outline
- deleteOutline(ids): delete episode outlines and their scripts
- generateAssets(): extract characters, props and scenes from the outline
- AI1(task): delegate to the storyline author
- AI2(task): delegate to the outline author
- director(task): delegate to the director for review";

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterHeading {
    pub index: u32,
    pub volume: u32,
    pub title: String,
}

/// Chapter text available to one session.
#[async_trait]
pub trait ChapterSource: Send + Sync {
    fn headings(&self) -> Vec<ChapterHeading>;
    async fn chapter(&self, index: u32) -> Result<Option<Chapter>>;
}

/// Chapters loaded once and held in memory for the session.
#[derive(Debug, Clone, Default)]
pub struct LoadedChapters {
    chapters: Vec<Chapter>,
}

impl LoadedChapters {
    pub fn new(mut chapters: Vec<Chapter>) -> Self {
        chapters.sort_by_key(|c| c.index);
        Self { chapters }
    }

    pub async fn load(store: &dyn RecordStore, project_id: i64) -> Result<Self> {
        let chapters = store.chapters(project_id).await?;
        tracing::debug!(project_id, count = chapters.len(), "loaded chapters");
        Ok(Self::new(chapters))
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }
}

#[async_trait]
impl ChapterSource for LoadedChapters {
    fn headings(&self) -> Vec<ChapterHeading> {
        self.chapters
            .iter()
            .map(|c| ChapterHeading {
                index: c.index,
                volume: c.volume,
                title: c.title.clone(),
            })
            .collect()
    }

    async fn chapter(&self, index: u32) -> Result<Option<Chapter>> {
        Ok(self
            .chapters
            .binary_search_by_key(&index, |c| c.index)
            .ok()
            .map(|pos| self.chapters[pos].clone()))
    }
}

/// Renders the environment block that opens every system prompt and every
/// sub-agent payload.
pub struct ContextBuilder {
    store: Arc<dyn RecordStore>,
    chapters: Arc<dyn ChapterSource>,
    project_id: i64,
}

impl ContextBuilder {
    pub fn new(
        store: Arc<dyn RecordStore>,
        chapters: Arc<dyn ChapterSource>,
        project_id: i64,
    ) -> Self {
        Self {
            store,
            chapters,
            project_id,
        }
    }

    pub async fn build_environment(&self) -> Result<String> {
        let project = match self.store.project(self.project_id).await {
            Ok(project) => project,
            Err(e) => {
                tracing::warn!(project_id = self.project_id, error = %e, "project lookup failed");
                None
            }
        };
        let has_storyline = self.store.storyline(self.project_id).await?.is_some();
        let outline_count = self.store.count_outlines(self.project_id).await?;

        let mut out = String::from("# Project\n");
        out.push_str(&render_project(project.as_ref()));

        let headings = self.chapters.headings();
        let _ = write!(out, "\n\n# Chapters ({} loaded)\n", headings.len());
        if headings.is_empty() {
            out.push_str("(none)");
        } else {
            let lines: Vec<String> = headings
                .iter()
                .map(|h| format!("- [{}] Vol.{} {}", h.index, h.volume, h.title))
                .collect();
            out.push_str(&lines.join("\n"));
        }

        out.push_str("\n\n# Storyline\n");
        out.push_str(if has_storyline { "saved" } else { "none" });

        let _ = write!(out, "\n\n# Outline\n{outline_count} episode(s) saved");

        out.push_str("\n\n# Available operations\n");
        out.push_str(TOOL_CATALOG);
        Ok(out)
    }

    /// Environment, transcript and task in one user payload for a sub-agent.
    pub async fn build_full_context(&self, task: &str, history: &[HistoryEntry]) -> Result<String> {
        let environment = self.build_environment().await?;
        Ok(format!(
            "{environment}\n\n# Conversation so far\n{}\n\n# Task\n{task}",
            render_transcript(history)
        ))
    }
}

fn render_project(project: Option<&Project>) -> String {
    let Some(p) = project else {
        return NO_PROJECT_INFO.to_string();
    };
    let field = |v: &str| {
        if v.trim().is_empty() {
            "-".to_string()
        } else {
            v.to_string()
        }
    };
    format!(
        "Name: {}\nSynopsis: {}\nGenre: {}\nStyle: {}\nAspect ratio: {}",
        field(&p.name),
        field(&p.synopsis),
        field(&p.genre),
        field(&p.style),
        field(&p.aspect_ratio)
    )
}
