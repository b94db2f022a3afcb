use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use storyhive_schema::{
    Asset, AssetKind, Chapter, EpisodeOutline, NewOutline, NewScript, OutlineRecord,
    OutlinePayload, Project, PromptTemplate, Script, Storyline,
};
use tokio::task;

use crate::migrations::run_migrations;
use crate::{NewEpisode, NewProject, OutlineBatch, OutlineDeletion, RecordStore};

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database: {path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn db(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            f(&mut conn)
        })
        .await?
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_datetime_sql(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_asset_kind_sql(raw: &str) -> rusqlite::Result<AssetKind> {
    raw.parse::<AssetKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e.to_string()),
        )
    })
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        synopsis: row.get(2)?,
        genre: row.get(3)?,
        style: row.get(4)?,
        aspect_ratio: row.get(5)?,
    })
}

fn row_to_chapter(row: &Row<'_>) -> rusqlite::Result<Chapter> {
    Ok(Chapter {
        project_id: row.get(0)?,
        index: row.get(1)?,
        volume: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
    })
}

fn row_to_storyline(row: &Row<'_>) -> rusqlite::Result<Storyline> {
    let updated_raw: String = row.get(3)?;
    Ok(Storyline {
        id: row.get(0)?,
        project_id: row.get(1)?,
        content: row.get(2)?,
        updated_at: parse_datetime_sql(&updated_raw)?,
    })
}

fn row_to_outline(row: &Row<'_>) -> rusqlite::Result<OutlineRecord> {
    let data_raw: String = row.get(3)?;
    let updated_raw: String = row.get(4)?;
    Ok(OutlineRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        episode: row.get(2)?,
        data: OutlinePayload::decode(&data_raw),
        updated_at: parse_datetime_sql(&updated_raw)?,
    })
}

fn row_to_script(row: &Row<'_>) -> rusqlite::Result<Script> {
    Ok(Script {
        id: row.get(0)?,
        project_id: row.get(1)?,
        outline_id: row.get(2)?,
        name: row.get(3)?,
        content: row.get(4)?,
    })
}

fn row_to_asset(row: &Row<'_>) -> rusqlite::Result<Asset> {
    let kind_raw: String = row.get(2)?;
    Ok(Asset {
        id: row.get(0)?,
        project_id: row.get(1)?,
        kind: parse_asset_kind_sql(&kind_raw)?,
        name: row.get(3)?,
        description: row.get(4)?,
    })
}

const OUTLINE_COLUMNS: &str = "id, project_id, episode, data, updated_at";

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create_project(&self, project: NewProject) -> Result<i64> {
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO projects (name, synopsis, genre, style, aspect_ratio, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    project.name,
                    project.synopsis,
                    project.genre,
                    project.style,
                    project.aspect_ratio,
                    now_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn project(&self, project_id: i64) -> Result<Option<Project>> {
        self.with_conn(move |conn| {
            let project = conn
                .query_row(
                    "SELECT id, name, synopsis, genre, style, aspect_ratio FROM projects WHERE id = ?1",
                    params![project_id],
                    row_to_project,
                )
                .optional()?;
            Ok(project)
        })
        .await
    }

    async fn insert_chapters(&self, chapters: Vec<Chapter>) -> Result<usize> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for chapter in &chapters {
                tx.execute(
                    r#"
                    INSERT INTO chapters (project_id, chapter_index, volume, title, content)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        chapter.project_id,
                        chapter.index,
                        chapter.volume,
                        chapter.title,
                        chapter.content,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(chapters.len())
        })
        .await
    }

    async fn chapters(&self, project_id: i64) -> Result<Vec<Chapter>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT project_id, chapter_index, volume, title, content
                FROM chapters
                WHERE project_id = ?1
                ORDER BY chapter_index ASC
                "#,
            )?;
            let rows = stmt.query_map(params![project_id], row_to_chapter)?;
            let mut chapters = Vec::new();
            for row in rows {
                chapters.push(row?);
            }
            Ok(chapters)
        })
        .await
    }

    async fn storyline(&self, project_id: i64) -> Result<Option<Storyline>> {
        self.with_conn(move |conn| {
            let storyline = conn
                .query_row(
                    "SELECT id, project_id, content, updated_at FROM storylines WHERE project_id = ?1",
                    params![project_id],
                    row_to_storyline,
                )
                .optional()?;
            Ok(storyline)
        })
        .await
    }

    async fn insert_storyline(&self, project_id: i64, content: &str) -> Result<i64> {
        let content = content.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO storylines (project_id, content, updated_at) VALUES (?1, ?2, ?3)",
                params![project_id, content, now_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn update_storyline(&self, project_id: i64, content: &str) -> Result<u64> {
        let content = content.to_owned();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE storylines SET content = ?2, updated_at = ?3 WHERE project_id = ?1",
                params![project_id, content, now_rfc3339()],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn delete_storyline(&self, project_id: i64) -> Result<u64> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM storylines WHERE project_id = ?1",
                params![project_id],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn outlines(&self, project_id: i64) -> Result<Vec<OutlineRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OUTLINE_COLUMNS} FROM outlines WHERE project_id = ?1 ORDER BY episode ASC"
            ))?;
            let rows = stmt.query_map(params![project_id], row_to_outline)?;
            let mut outlines = Vec::new();
            for row in rows {
                outlines.push(row?);
            }
            Ok(outlines)
        })
        .await
    }

    async fn outline(&self, project_id: i64, id: i64) -> Result<Option<OutlineRecord>> {
        self.with_conn(move |conn| {
            let outline = conn
                .query_row(
                    &format!(
                        "SELECT {OUTLINE_COLUMNS} FROM outlines WHERE project_id = ?1 AND id = ?2"
                    ),
                    params![project_id, id],
                    row_to_outline,
                )
                .optional()?;
            Ok(outline)
        })
        .await
    }

    async fn count_outlines(&self, project_id: i64) -> Result<u64> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM outlines WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn max_episode(&self, project_id: i64) -> Result<Option<u32>> {
        self.with_conn(move |conn| {
            let max: Option<u32> = conn.query_row(
                "SELECT MAX(episode) FROM outlines WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )?;
            Ok(max)
        })
        .await
    }

    async fn insert_outlines(
        &self,
        project_id: i64,
        outlines: Vec<NewOutline>,
    ) -> Result<Vec<i64>> {
        self.with_conn(move |conn| {
            let now = now_rfc3339();
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(outlines.len());
            for outline in &outlines {
                let data = OutlinePayload::encode(&outline.data)?;
                tx.execute(
                    r#"
                    INSERT INTO outlines (project_id, episode, data, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![project_id, outline.episode, data, now],
                )?;
                ids.push(tx.last_insert_rowid());
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    async fn update_outline(&self, project_id: i64, id: i64, data: &EpisodeOutline) -> Result<u64> {
        let data = OutlinePayload::encode(data)?;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE outlines SET data = ?3, updated_at = ?4 WHERE project_id = ?1 AND id = ?2",
                params![project_id, id, data, now_rfc3339()],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn delete_outline(&self, project_id: i64, id: i64) -> Result<u64> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM outlines WHERE project_id = ?1 AND id = ?2",
                params![project_id, id],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn delete_all_outlines(&self, project_id: i64) -> Result<u64> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM outlines WHERE project_id = ?1",
                params![project_id],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn save_outline_batch(
        &self,
        project_id: i64,
        episodes: Vec<NewEpisode>,
        overwrite: bool,
    ) -> Result<OutlineBatch> {
        self.with_conn(move |conn| {
            let now = now_rfc3339();
            let tx = conn.transaction()?;

            let mut removed = 0;
            if overwrite {
                tx.execute(
                    "DELETE FROM scripts WHERE project_id = ?1",
                    params![project_id],
                )?;
                removed = tx.execute(
                    "DELETE FROM outlines WHERE project_id = ?1",
                    params![project_id],
                )? as u64;
            } else {
                let mut taken = Vec::new();
                {
                    let mut stmt = tx.prepare(
                        "SELECT 1 FROM outlines WHERE project_id = ?1 AND episode = ?2",
                    )?;
                    for episode in &episodes {
                        if stmt.exists(params![project_id, episode.outline.episode])? {
                            taken.push(episode.outline.episode);
                        }
                    }
                }
                if !taken.is_empty() {
                    return Ok(OutlineBatch::Conflict { episodes: taken });
                }
            }

            let mut outline_ids = Vec::with_capacity(episodes.len());
            let mut script_ids = Vec::with_capacity(episodes.len());
            for episode in &episodes {
                let data = OutlinePayload::encode(&episode.outline.data)?;
                tx.execute(
                    r#"
                    INSERT INTO outlines (project_id, episode, data, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![project_id, episode.outline.episode, data, now],
                )?;
                let outline_id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO scripts (project_id, outline_id, name, content) VALUES (?1, ?2, ?3, '')",
                    params![project_id, outline_id, episode.script_name],
                )?;
                outline_ids.push(outline_id);
                script_ids.push(tx.last_insert_rowid());
            }

            tx.commit()?;
            Ok(OutlineBatch::Saved {
                removed,
                outline_ids,
                script_ids,
            })
        })
        .await
    }

    async fn delete_outline_with_script(
        &self,
        project_id: i64,
        id: i64,
    ) -> Result<OutlineDeletion> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let scripts = tx.execute(
                "DELETE FROM scripts WHERE project_id = ?1 AND outline_id = ?2",
                params![project_id, id],
            )?;
            let outlines = tx.execute(
                "DELETE FROM outlines WHERE project_id = ?1 AND id = ?2",
                params![project_id, id],
            )?;
            tx.commit()?;
            Ok(OutlineDeletion {
                outlines: outlines as u64,
                scripts: scripts as u64,
            })
        })
        .await
    }

    async fn insert_scripts(&self, project_id: i64, scripts: Vec<NewScript>) -> Result<Vec<i64>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(scripts.len());
            for script in &scripts {
                tx.execute(
                    "INSERT INTO scripts (project_id, outline_id, name, content) VALUES (?1, ?2, ?3, '')",
                    params![project_id, script.outline_id, script.name],
                )?;
                ids.push(tx.last_insert_rowid());
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    async fn scripts(&self, project_id: i64) -> Result<Vec<Script>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, project_id, outline_id, name, content
                FROM scripts
                WHERE project_id = ?1
                ORDER BY id ASC
                "#,
            )?;
            let rows = stmt.query_map(params![project_id], row_to_script)?;
            let mut scripts = Vec::new();
            for row in rows {
                scripts.push(row?);
            }
            Ok(scripts)
        })
        .await
    }

    async fn count_scripts(&self, project_id: i64) -> Result<u64> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM scripts WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn delete_script_for_outline(&self, project_id: i64, outline_id: i64) -> Result<u64> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM scripts WHERE project_id = ?1 AND outline_id = ?2",
                params![project_id, outline_id],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn delete_all_scripts(&self, project_id: i64) -> Result<u64> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM scripts WHERE project_id = ?1",
                params![project_id],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn asset(&self, project_id: i64, kind: AssetKind, name: &str) -> Result<Option<Asset>> {
        let name = name.to_owned();
        self.with_conn(move |conn| {
            let asset = conn
                .query_row(
                    r#"
                    SELECT id, project_id, kind, name, description
                    FROM assets
                    WHERE project_id = ?1 AND kind = ?2 AND name = ?3
                    "#,
                    params![project_id, kind.as_str(), name],
                    row_to_asset,
                )
                .optional()?;
            Ok(asset)
        })
        .await
    }

    async fn assets(&self, project_id: i64) -> Result<Vec<Asset>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, project_id, kind, name, description
                FROM assets
                WHERE project_id = ?1
                ORDER BY kind ASC, id ASC
                "#,
            )?;
            let rows = stmt.query_map(params![project_id], row_to_asset)?;
            let mut assets = Vec::new();
            for row in rows {
                assets.push(row?);
            }
            Ok(assets)
        })
        .await
    }

    async fn insert_asset(
        &self,
        project_id: i64,
        kind: AssetKind,
        name: &str,
        description: &str,
    ) -> Result<i64> {
        let name = name.to_owned();
        let description = description.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO assets (project_id, kind, name, description) VALUES (?1, ?2, ?3, ?4)",
                params![project_id, kind.as_str(), name, description],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn update_asset_description(&self, id: i64, description: &str) -> Result<u64> {
        let description = description.to_owned();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE assets SET description = ?2 WHERE id = ?1",
                params![id, description],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn prompt_template(&self, code: &str) -> Result<Option<PromptTemplate>> {
        let code = code.to_owned();
        self.with_conn(move |conn| {
            let template = conn
                .query_row(
                    "SELECT code, custom_value, default_value FROM prompt_templates WHERE code = ?1",
                    params![code],
                    |row| {
                        Ok(PromptTemplate {
                            code: row.get(0)?,
                            custom_value: row.get(1)?,
                            default_value: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(template)
        })
        .await
    }

    async fn set_prompt_custom(&self, code: &str, value: Option<&str>) -> Result<()> {
        let code = code.to_owned();
        let value = value.map(str::to_owned);
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO prompt_templates (code, custom_value) VALUES (?1, ?2)
                ON CONFLICT(code) DO UPDATE SET custom_value = excluded.custom_value
                "#,
                params![code, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_prompt_default(&self, code: &str, value: &str) -> Result<()> {
        let code = code.to_owned();
        let value = value.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO prompt_templates (code, default_value) VALUES (?1, ?2)
                ON CONFLICT(code) DO UPDATE SET default_value = excluded.default_value
                "#,
                params![code, value],
            )?;
            Ok(())
        })
        .await
    }
}
