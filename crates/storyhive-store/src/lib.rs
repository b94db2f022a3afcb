//! Keyed record persistence for projects, chapters and the narrative
//! artifacts derived from them.
//!
//! The orchestration core only talks to [`RecordStore`]; [`SqliteStore`] is
//! the bundled implementation.

pub mod migrations;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storyhive_schema::{
    Asset, AssetKind, Chapter, EpisodeOutline, NewOutline, NewScript, OutlineRecord, Project,
    PromptTemplate, Script, Storyline,
};

pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub aspect_ratio: String,
}

/// One outline plus the script created alongside it.
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub outline: NewOutline,
    pub script_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineBatch {
    Saved {
        /// Outlines cleared by an overwrite.
        removed: u64,
        outline_ids: Vec<i64>,
        script_ids: Vec<i64>,
    },
    /// Episode numbers already taken. Nothing was written.
    Conflict { episodes: Vec<u32> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutlineDeletion {
    pub outlines: u64,
    pub scripts: u64,
}

/// Typed find/first/insert/update/delete/aggregate operations per collection.
///
/// Update and delete operations return the number of affected rows so callers
/// can tell a no-op from a hit.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // projects and chapters
    async fn create_project(&self, project: NewProject) -> Result<i64>;
    async fn project(&self, project_id: i64) -> Result<Option<Project>>;
    async fn insert_chapters(&self, chapters: Vec<Chapter>) -> Result<usize>;
    /// Ordered by chapter index.
    async fn chapters(&self, project_id: i64) -> Result<Vec<Chapter>>;

    // storyline
    async fn storyline(&self, project_id: i64) -> Result<Option<Storyline>>;
    async fn insert_storyline(&self, project_id: i64, content: &str) -> Result<i64>;
    async fn update_storyline(&self, project_id: i64, content: &str) -> Result<u64>;
    async fn delete_storyline(&self, project_id: i64) -> Result<u64>;

    // outlines
    /// Ordered by episode number.
    async fn outlines(&self, project_id: i64) -> Result<Vec<OutlineRecord>>;
    async fn outline(&self, project_id: i64, id: i64) -> Result<Option<OutlineRecord>>;
    async fn count_outlines(&self, project_id: i64) -> Result<u64>;
    async fn max_episode(&self, project_id: i64) -> Result<Option<u32>>;
    /// Inserts all records atomically; ids are returned in input order.
    async fn insert_outlines(&self, project_id: i64, outlines: Vec<NewOutline>) -> Result<Vec<i64>>;
    async fn update_outline(&self, project_id: i64, id: i64, data: &EpisodeOutline) -> Result<u64>;
    async fn delete_outline(&self, project_id: i64, id: i64) -> Result<u64>;
    async fn delete_all_outlines(&self, project_id: i64) -> Result<u64>;
    /// Writes a whole outline save in one transaction: with `overwrite` the
    /// project's outlines and scripts are cleared first, otherwise taken
    /// episode numbers abort the batch. Each outline gets its script.
    async fn save_outline_batch(
        &self,
        project_id: i64,
        episodes: Vec<NewEpisode>,
        overwrite: bool,
    ) -> Result<OutlineBatch>;
    /// Removes one outline and its script together.
    async fn delete_outline_with_script(&self, project_id: i64, id: i64)
        -> Result<OutlineDeletion>;

    // scripts
    async fn insert_scripts(&self, project_id: i64, scripts: Vec<NewScript>) -> Result<Vec<i64>>;
    async fn scripts(&self, project_id: i64) -> Result<Vec<Script>>;
    async fn count_scripts(&self, project_id: i64) -> Result<u64>;
    async fn delete_script_for_outline(&self, project_id: i64, outline_id: i64) -> Result<u64>;
    async fn delete_all_scripts(&self, project_id: i64) -> Result<u64>;

    // assets
    async fn asset(&self, project_id: i64, kind: AssetKind, name: &str) -> Result<Option<Asset>>;
    async fn assets(&self, project_id: i64) -> Result<Vec<Asset>>;
    async fn insert_asset(
        &self,
        project_id: i64,
        kind: AssetKind,
        name: &str,
        description: &str,
    ) -> Result<i64>;
    async fn update_asset_description(&self, id: i64, description: &str) -> Result<u64>;

    // prompt templates
    async fn prompt_template(&self, code: &str) -> Result<Option<PromptTemplate>>;
    async fn set_prompt_custom(&self, code: &str, value: Option<&str>) -> Result<()>;
    async fn set_prompt_default(&self, code: &str, value: &str) -> Result<()>;
}
