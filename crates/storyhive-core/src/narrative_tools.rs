use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use storyhive_provider::ToolDef;
use storyhive_schema::EpisodeOutline;

use super::context::ChapterSource;
use super::narrative::{DeleteOutcome, NarrativeManager, OutlineSave, StorylineSave};
use super::tool::{parse_input, ToolContext, ToolError, ToolExecutor, ToolOutput, ToolRegistry};

pub const GET_CHAPTER: &str = "getChapter";
pub const GET_STORYLINE: &str = "getStoryline";
pub const SAVE_STORYLINE: &str = "saveStoryline";
pub const DELETE_STORYLINE: &str = "deleteStoryline";
pub const GET_OUTLINE: &str = "getOutline";
pub const SAVE_OUTLINE: &str = "saveOutline";
pub const UPDATE_OUTLINE: &str = "updateOutline";
pub const DELETE_OUTLINE: &str = "deleteOutline";
pub const GENERATE_ASSETS: &str = "generateAssets";

/// Tools a delegated persona may call.
pub const SUB_AGENT_TOOLS: [&str; 6] = [
    GET_CHAPTER,
    GET_STORYLINE,
    SAVE_STORYLINE,
    GET_OUTLINE,
    SAVE_OUTLINE,
    UPDATE_OUTLINE,
];

const NO_STORYLINE: &str = "No storyline saved yet.";
const NO_OUTLINE: &str = "No outline saved yet.";

/// Registers every chapter, storyline, outline and asset tool.
pub fn register_narrative_tools(
    registry: &mut ToolRegistry,
    narrative: Arc<NarrativeManager>,
    chapters: Arc<dyn ChapterSource>,
) {
    registry.register(Arc::new(GetChapterTool::new(chapters)));
    registry.register(Arc::new(GetStorylineTool(Arc::clone(&narrative))));
    registry.register(Arc::new(SaveStorylineTool(Arc::clone(&narrative))));
    registry.register(Arc::new(DeleteStorylineTool(Arc::clone(&narrative))));
    registry.register(Arc::new(GetOutlineTool(Arc::clone(&narrative))));
    registry.register(Arc::new(SaveOutlineTool(Arc::clone(&narrative))));
    registry.register(Arc::new(UpdateOutlineTool(Arc::clone(&narrative))));
    registry.register(Arc::new(DeleteOutlineTool(Arc::clone(&narrative))));
    registry.register(Arc::new(GenerateAssetsTool(narrative)));
}

fn episode_schema() -> serde_json::Value {
    let entities = serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"}
            },
            "required": ["name"]
        }
    });
    serde_json::json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "chapterRange": {
                "type": "object",
                "properties": {
                    "start": {"type": "integer", "minimum": 1},
                    "end": {"type": "integer", "minimum": 1}
                }
            },
            "coreConflict": {"type": "string"},
            "scenes": entities,
            "characters": entities,
            "props": entities,
            "keyEvents": {
                "type": "object",
                "properties": {
                    "setup": {"type": "string"},
                    "development": {"type": "string"},
                    "turn": {"type": "string"},
                    "resolution": {"type": "string"}
                }
            },
            "emotionalCurve": {"type": "string"},
            "openingHook": {"type": "string"},
            "endingHook": {"type": "string"},
            "highlightShots": {"type": "array", "items": {"type": "string"}},
            "classicLines": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["title"]
    })
}

fn validate_episode(tool: &str, doc: &EpisodeOutline) -> Result<(), ToolError> {
    if doc.title.trim().is_empty() {
        return Err(ToolError::validation(tool, "episode title must not be empty"));
    }
    let range = doc.chapter_range;
    if range.start > range.end {
        return Err(ToolError::validation(
            tool,
            format!("chapter range {}-{} is reversed", range.start, range.end),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// getChapter
// ---------------------------------------------------------------------------

pub struct GetChapterTool {
    chapters: Arc<dyn ChapterSource>,
}

impl GetChapterTool {
    pub fn new(chapters: Arc<dyn ChapterSource>) -> Self {
        Self { chapters }
    }
}

#[derive(Deserialize)]
struct GetChapterInput {
    chapters: Vec<i64>,
}

#[async_trait]
impl ToolExecutor for GetChapterTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: GET_CHAPTER.into(),
            description: "Read the full text of one or more chapters of the novel, by chapter number.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "chapters": {
                        "type": "array",
                        "items": {"type": "integer", "minimum": 1},
                        "minItems": 1,
                        "description": "Chapter numbers to read, in the order they should be returned"
                    }
                },
                "required": ["chapters"]
            }),
        }
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let input: GetChapterInput = parse_input(GET_CHAPTER, input)?;
        if input.chapters.is_empty() {
            return Err(ToolError::validation(GET_CHAPTER, "at least one chapter is required"));
        }
        let mut numbers = Vec::with_capacity(input.chapters.len());
        for n in input.chapters {
            let valid = u32::try_from(n).ok().filter(|n| *n >= 1);
            let Some(n) = valid else {
                return Err(ToolError::validation(
                    GET_CHAPTER,
                    format!("chapter numbers start at 1, got {n}"),
                ));
            };
            numbers.push(n);
        }

        let fetched = join_all(numbers.iter().map(|&n| self.chapters.chapter(n))).await;

        let mut sections = Vec::with_capacity(numbers.len());
        for (n, chapter) in numbers.iter().zip(fetched) {
            sections.push(match chapter? {
                Some(c) => format!(
                    "## Chapter {} (Vol.{}): {}\n{}",
                    c.index, c.volume, c.title, c.content
                ),
                None => format!("## Chapter {n}\nnot found"),
            });
        }
        Ok(ToolOutput::text(sections.join("\n\n")))
    }
}

// ---------------------------------------------------------------------------
// storyline
// ---------------------------------------------------------------------------

pub struct GetStorylineTool(Arc<NarrativeManager>);

#[async_trait]
impl ToolExecutor for GetStorylineTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: GET_STORYLINE.into(),
            description: "Read the project's current storyline.".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        Ok(match self.0.storyline().await? {
            Some(storyline) => ToolOutput::text(storyline.content),
            None => ToolOutput::text(NO_STORYLINE),
        })
    }
}

pub struct SaveStorylineTool(Arc<NarrativeManager>);

#[derive(Deserialize)]
struct SaveStorylineInput {
    content: String,
}

#[async_trait]
impl ToolExecutor for SaveStorylineTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: SAVE_STORYLINE.into(),
            description: "Save the storyline, replacing any existing one.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "Full storyline text"}
                },
                "required": ["content"]
            }),
        }
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let input: SaveStorylineInput = parse_input(SAVE_STORYLINE, input)?;
        if input.content.trim().is_empty() {
            return Err(ToolError::validation(SAVE_STORYLINE, "content must not be empty"));
        }
        tracing::debug!(agent = %ctx.agent(), chars = input.content.len(), "saving storyline");
        let message = match self.0.save_storyline(&input.content).await? {
            StorylineSave::Created => "Storyline created.",
            StorylineSave::Replaced => "Storyline replaced.",
        };
        Ok(ToolOutput::text(message))
    }
}

pub struct DeleteStorylineTool(Arc<NarrativeManager>);

#[async_trait]
impl ToolExecutor for DeleteStorylineTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: DELETE_STORYLINE.into(),
            description: "Delete the project's storyline.".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let message = if self.0.delete_storyline().await? {
            "Storyline deleted."
        } else {
            NO_STORYLINE
        };
        Ok(ToolOutput::text(message))
    }
}

// ---------------------------------------------------------------------------
// outline
// ---------------------------------------------------------------------------

pub struct GetOutlineTool(Arc<NarrativeManager>);

#[derive(Deserialize, Default)]
struct GetOutlineInput {
    #[serde(default)]
    simplified: bool,
}

#[async_trait]
impl ToolExecutor for GetOutlineTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: GET_OUTLINE.into(),
            description: "Read the saved episode outlines. With simplified=true only ids, episode numbers and titles are listed.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "simplified": {"type": "boolean", "default": false}
                }
            }),
        }
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let input: GetOutlineInput = if input.is_null() {
            GetOutlineInput::default()
        } else {
            parse_input(GET_OUTLINE, input)?
        };
        let outlines = self.0.outlines().await?;
        if outlines.is_empty() {
            return Ok(ToolOutput::text(NO_OUTLINE));
        }

        let rendered: Vec<String> = if input.simplified {
            outlines
                .iter()
                .map(|o| format!("id={} episode={}: {}", o.id, o.episode, o.data.title))
                .collect()
        } else {
            outlines
                .iter()
                .map(|o| format!("[id {}]\n{}", o.id, o.data.render(o.episode)))
                .collect()
        };
        let sep = if input.simplified { "\n" } else { "\n\n" };
        Ok(ToolOutput::text(rendered.join(sep)))
    }
}

pub struct SaveOutlineTool(Arc<NarrativeManager>);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveOutlineInput {
    episodes: Vec<EpisodeOutline>,
    #[serde(default)]
    overwrite: bool,
    #[serde(default)]
    start_episode: Option<i64>,
}

#[async_trait]
impl ToolExecutor for SaveOutlineTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: SAVE_OUTLINE.into(),
            description: "Save episode outlines. overwrite=true replaces every saved episode and renumbers from 1; otherwise episodes are appended after the last saved one, or numbered from startEpisode.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "episodes": {"type": "array", "items": episode_schema(), "minItems": 1},
                    "overwrite": {"type": "boolean", "default": false},
                    "startEpisode": {"type": "integer", "minimum": 1}
                },
                "required": ["episodes", "overwrite"]
            }),
        }
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let input: SaveOutlineInput = parse_input(SAVE_OUTLINE, input)?;
        if input.episodes.is_empty() {
            return Err(ToolError::validation(SAVE_OUTLINE, "at least one episode is required"));
        }
        for doc in &input.episodes {
            validate_episode(SAVE_OUTLINE, doc)?;
        }
        let start_episode = match input.start_episode {
            None => None,
            Some(n) => match u32::try_from(n) {
                Ok(n) if n >= 1 => Some(n),
                _ => {
                    return Err(ToolError::validation(
                        SAVE_OUTLINE,
                        format!("startEpisode must be at least 1, got {n}"),
                    ))
                }
            },
        };

        tracing::debug!(
            agent = %ctx.agent(),
            episodes = input.episodes.len(),
            overwrite = input.overwrite,
            "saving outline"
        );
        let outcome = self
            .0
            .save_outlines(input.episodes, input.overwrite, start_episode)
            .await?;

        Ok(match outcome {
            OutlineSave::Saved(report) => {
                let first = report.episodes.first().copied().unwrap_or_default();
                let last = report.episodes.last().copied().unwrap_or_default();
                ToolOutput::text(format!(
                    "Saved {} episode(s), numbered {first}-{last}, with {} empty script(s). Removed {} existing outline(s).",
                    report.inserted, report.scripts, report.removed
                ))
            }
            OutlineSave::Conflict { episodes } => ToolOutput::text(format!(
                "Nothing saved: episode(s) {} already exist. Use updateOutline, another startEpisode, or overwrite=true.",
                join_numbers(&episodes)
            )),
        })
    }
}

fn join_numbers(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct UpdateOutlineTool(Arc<NarrativeManager>);

#[derive(Deserialize)]
struct UpdateOutlineInput {
    id: i64,
    episode: EpisodeOutline,
}

#[async_trait]
impl ToolExecutor for UpdateOutlineTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: UPDATE_OUTLINE.into(),
            description: "Replace the document of one saved episode outline, addressed by its id.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer", "description": "Outline id from getOutline"},
                    "episode": episode_schema()
                },
                "required": ["id", "episode"]
            }),
        }
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let input: UpdateOutlineInput = parse_input(UPDATE_OUTLINE, input)?;
        validate_episode(UPDATE_OUTLINE, &input.episode)?;
        Ok(match self.0.update_outline(input.id, input.episode).await? {
            Some(episode) => ToolOutput::text(format!("Outline {} (episode {episode}) updated.", input.id)),
            None => ToolOutput::text(format!("No outline with id {} exists.", input.id)),
        })
    }
}

pub struct DeleteOutlineTool(Arc<NarrativeManager>);

#[derive(Deserialize)]
struct DeleteOutlineInput {
    ids: Vec<i64>,
}

#[async_trait]
impl ToolExecutor for DeleteOutlineTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: DELETE_OUTLINE.into(),
            description: "Delete episode outlines by id, together with their scripts.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "ids": {"type": "array", "items": {"type": "integer"}, "minItems": 1}
                },
                "required": ["ids"]
            }),
        }
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let input: DeleteOutlineInput = parse_input(DELETE_OUTLINE, input)?;
        if input.ids.is_empty() {
            return Err(ToolError::validation(DELETE_OUTLINE, "at least one id is required"));
        }
        let statuses = self.0.delete_outlines(&input.ids).await?;

        let deleted = statuses
            .iter()
            .filter(|s| matches!(s.outcome, DeleteOutcome::Deleted { .. }))
            .count();
        let mut lines = vec![format!(
            "Deleted {deleted} of {} outline(s).",
            statuses.len()
        )];
        for status in &statuses {
            lines.push(match &status.outcome {
                DeleteOutcome::Deleted {
                    script_removed: true,
                } => format!("id {}: deleted with its script", status.id),
                DeleteOutcome::Deleted {
                    script_removed: false,
                } => format!("id {}: deleted", status.id),
                DeleteOutcome::NotFound => format!("id {}: not found", status.id),
                DeleteOutcome::Failed(e) => format!("id {}: failed ({e})", status.id),
            });
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }
}

// ---------------------------------------------------------------------------
// assets
// ---------------------------------------------------------------------------

pub struct GenerateAssetsTool(Arc<NarrativeManager>);

#[async_trait]
impl ToolExecutor for GenerateAssetsTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: GENERATE_ASSETS.into(),
            description: "Extract characters, props and scenes from all saved outlines into the asset library.".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let report = self.0.generate_assets().await?;
        Ok(ToolOutput::text(format!(
            "Assets: {} inserted, {} updated, {} unchanged.",
            report.inserted, report.updated, report.unchanged
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LoadedChapters;
    use storyhive_bus::EventBus;
    use storyhive_schema::{AgentRole, Chapter};
    use storyhive_store::{NewProject, RecordStore, SqliteStore};

    struct Fixture {
        store: Arc<SqliteStore>,
        registry: ToolRegistry,
        project_id: i64,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let project_id = store
            .create_project(NewProject {
                name: "Tools".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let bus = EventBus::new(64);
        let narrative = Arc::new(NarrativeManager::new(
            store.clone(),
            project_id,
            bus.publisher(),
        ));
        let chapters = LoadedChapters::new(
            (1..=3)
                .map(|index| Chapter {
                    project_id,
                    index,
                    volume: 1,
                    title: format!("T{index}"),
                    content: format!("C{index}"),
                })
                .collect(),
        );
        let mut registry = ToolRegistry::new();
        register_narrative_tools(&mut registry, narrative, Arc::new(chapters));
        Fixture {
            store,
            registry,
            project_id,
        }
    }

    async fn run(
        f: &Fixture,
        name: &str,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        f.registry
            .execute(name, input, &ToolContext::new(AgentRole::Main))
            .await
    }

    #[tokio::test]
    async fn catalog_is_complete() {
        let f = fixture().await;
        assert_eq!(
            f.registry.names(),
            vec![
                GET_CHAPTER,
                GET_STORYLINE,
                SAVE_STORYLINE,
                DELETE_STORYLINE,
                GET_OUTLINE,
                SAVE_OUTLINE,
                UPDATE_OUTLINE,
                DELETE_OUTLINE,
                GENERATE_ASSETS
            ]
        );
        assert_eq!(f.registry.subset(&SUB_AGENT_TOOLS).len(), 6);
    }

    #[tokio::test]
    async fn get_chapter_reports_missing_inline() {
        let f = fixture().await;
        let out = run(&f, GET_CHAPTER, serde_json::json!({"chapters": [3, 9, 1]}))
            .await
            .unwrap();
        assert!(!out.is_error);
        let sections: Vec<&str> = out.content.split("\n\n").collect();
        assert_eq!(sections[0], "## Chapter 3 (Vol.1): T3\nC3");
        assert_eq!(sections[1], "## Chapter 9\nnot found");
        assert_eq!(sections[2], "## Chapter 1 (Vol.1): T1\nC1");
    }

    #[tokio::test]
    async fn get_chapter_rejects_bad_numbers() {
        let f = fixture().await;
        for input in [
            serde_json::json!({"chapters": []}),
            serde_json::json!({"chapters": [0]}),
            serde_json::json!({"chapters": [-2]}),
            serde_json::json!({}),
        ] {
            let err = run(&f, GET_CHAPTER, input).await.unwrap_err();
            assert!(matches!(err, ToolError::Validation { .. }), "{err}");
        }
    }

    #[tokio::test]
    async fn storyline_round_trip() {
        let f = fixture().await;
        let empty = run(&f, GET_STORYLINE, serde_json::json!({})).await.unwrap();
        assert_eq!(empty.content, NO_STORYLINE);

        let saved = run(&f, SAVE_STORYLINE, serde_json::json!({"content": "arc"}))
            .await
            .unwrap();
        assert_eq!(saved.content, "Storyline created.");
        let got = run(&f, GET_STORYLINE, serde_json::json!({})).await.unwrap();
        assert_eq!(got.content, "arc");

        let deleted = run(&f, DELETE_STORYLINE, serde_json::json!({})).await.unwrap();
        assert_eq!(deleted.content, "Storyline deleted.");
    }

    #[tokio::test]
    async fn blank_storyline_is_rejected_without_mutation() {
        let f = fixture().await;
        let err = run(&f, SAVE_STORYLINE, serde_json::json!({"content": "   "}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
        assert!(f.store.storyline(f.project_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_outline_validates_before_mutating() {
        let f = fixture().await;
        run(
            &f,
            SAVE_OUTLINE,
            serde_json::json!({"episodes": [{"title": "keep"}], "overwrite": false}),
        )
        .await
        .unwrap();

        let err = run(
            &f,
            SAVE_OUTLINE,
            serde_json::json!({
                "episodes": [{"title": "ok"}, {"title": ""}],
                "overwrite": true
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
        assert_eq!(f.store.count_outlines(f.project_id).await.unwrap(), 1);

        let err = run(
            &f,
            SAVE_OUTLINE,
            serde_json::json!({"episodes": [{"title": "x"}], "overwrite": false, "startEpisode": 0}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("startEpisode"));
    }

    #[tokio::test]
    async fn outline_listing_and_update() {
        let f = fixture().await;
        let saved = run(
            &f,
            SAVE_OUTLINE,
            serde_json::json!({
                "episodes": [
                    {"title": "Arrival", "chapterRange": {"start": 1, "end": 2}},
                    {"title": "Storm"}
                ],
                "overwrite": false
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            saved.content,
            "Saved 2 episode(s), numbered 1-2, with 2 empty script(s). Removed 0 existing outline(s)."
        );

        let ids: Vec<i64> = f
            .store
            .outlines(f.project_id)
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        let list = run(&f, GET_OUTLINE, serde_json::json!({"simplified": true}))
            .await
            .unwrap();
        assert_eq!(
            list.content,
            format!("id={} episode=1: Arrival\nid={} episode=2: Storm", ids[0], ids[1])
        );

        let full = run(&f, GET_OUTLINE, serde_json::json!({})).await.unwrap();
        assert!(full.content.contains("## Episode 1: Arrival\nChapters: 1-2"));

        let missing = run(
            &f,
            UPDATE_OUTLINE,
            serde_json::json!({"id": 999, "episode": {"title": "x"}}),
        )
        .await
        .unwrap();
        assert!(!missing.is_error);
        assert_eq!(missing.content, "No outline with id 999 exists.");

        let updated = run(
            &f,
            UPDATE_OUTLINE,
            serde_json::json!({"id": ids[1], "episode": {"title": "Calm"}}),
        )
        .await
        .unwrap();
        assert_eq!(updated.content, format!("Outline {} (episode 2) updated.", ids[1]));
    }

    #[tokio::test]
    async fn delete_outline_summarizes_each_id() {
        let f = fixture().await;
        run(
            &f,
            SAVE_OUTLINE,
            serde_json::json!({"episodes": [{"title": "a"}], "overwrite": false}),
        )
        .await
        .unwrap();
        let id = f.store.outlines(f.project_id).await.unwrap()[0].id;

        let out = run(&f, DELETE_OUTLINE, serde_json::json!({"ids": [id, 4242]}))
            .await
            .unwrap();
        assert_eq!(
            out.content,
            format!("Deleted 1 of 2 outline(s).\nid {id}: deleted with its script\nid 4242: not found")
        );
    }

    #[tokio::test]
    async fn delete_outline_reports_store_failure_per_id() {
        let f = fixture().await;
        run(
            &f,
            SAVE_OUTLINE,
            serde_json::json!({"episodes": [{"title": "a"}, {"title": "b"}], "overwrite": false}),
        )
        .await
        .unwrap();
        let ids: Vec<i64> = f
            .store
            .outlines(f.project_id)
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        {
            let db = f.store.db();
            let conn = db.lock().unwrap();
            conn.execute_batch(&format!(
                "CREATE TRIGGER outline_locked BEFORE DELETE ON outlines WHEN OLD.id = {} \
                 BEGIN SELECT RAISE(ABORT, 'outline locked'); END;",
                ids[0]
            ))
            .unwrap();
        }

        let out = run(&f, DELETE_OUTLINE, serde_json::json!({"ids": [ids[0], ids[1]]}))
            .await
            .unwrap();
        let lines: Vec<&str> = out.content.lines().collect();
        assert_eq!(lines[0], "Deleted 1 of 2 outline(s).");
        assert!(lines[1].starts_with(&format!("id {}: failed (", ids[0])));
        assert!(lines[1].contains("outline locked"));
        assert_eq!(lines[2], format!("id {}: deleted with its script", ids[1]));
        assert_eq!(f.store.count_outlines(f.project_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn generate_assets_reports_counts() {
        let f = fixture().await;
        run(
            &f,
            SAVE_OUTLINE,
            serde_json::json!({
                "episodes": [{"title": "a", "characters": [{"name": "Lin", "description": "courier"}]}],
                "overwrite": false
            }),
        )
        .await
        .unwrap();
        let out = run(&f, GENERATE_ASSETS, serde_json::json!({})).await.unwrap();
        assert_eq!(out.content, "Assets: 1 inserted, 0 updated, 0 unchanged.");
        let again = run(&f, GENERATE_ASSETS, serde_json::json!({})).await.unwrap();
        assert_eq!(again.content, "Assets: 0 inserted, 0 updated, 1 unchanged.");
    }
}
