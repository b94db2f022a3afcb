//! Merge and cascade rules over storyline, outline, script and asset records.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use storyhive_bus::BusPublisher;
use storyhive_schema::{
    AssetKind, EngineEvent, EpisodeOutline, NewOutline, OutlineEntity, OutlineRecord,
    RefreshTarget, Storyline,
};
use storyhive_store::{NewEpisode, OutlineBatch, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorylineSave {
    Created,
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineSaveReport {
    /// Outlines removed by an overwrite.
    pub removed: u64,
    pub inserted: usize,
    /// Empty scripts created, one per inserted outline.
    pub scripts: usize,
    /// Episode numbers assigned, in input order.
    pub episodes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineSave {
    Saved(OutlineSaveReport),
    /// The requested numbering collides with episodes already saved.
    Conflict { episodes: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { script_removed: bool },
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStatus {
    pub id: i64,
    pub outcome: DeleteOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

pub struct NarrativeManager {
    store: Arc<dyn RecordStore>,
    project_id: i64,
    publisher: BusPublisher,
}

impl NarrativeManager {
    pub fn new(store: Arc<dyn RecordStore>, project_id: i64, publisher: BusPublisher) -> Self {
        Self {
            store,
            project_id,
            publisher,
        }
    }

    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    async fn refresh(&self, target: RefreshTarget) -> Result<()> {
        self.publisher.publish(EngineEvent::Refresh { target }).await
    }

    pub async fn storyline(&self) -> Result<Option<Storyline>> {
        self.store.storyline(self.project_id).await
    }

    /// Creates the project's storyline or replaces it in place.
    pub async fn save_storyline(&self, content: &str) -> Result<StorylineSave> {
        let outcome = if self.store.update_storyline(self.project_id, content).await? > 0 {
            StorylineSave::Replaced
        } else {
            self.store.insert_storyline(self.project_id, content).await?;
            StorylineSave::Created
        };
        tracing::info!(project_id = self.project_id, ?outcome, "storyline saved");
        self.refresh(RefreshTarget::Storyline).await?;
        Ok(outcome)
    }

    /// Returns whether a storyline existed.
    pub async fn delete_storyline(&self) -> Result<bool> {
        let removed = self.store.delete_storyline(self.project_id).await? > 0;
        tracing::info!(project_id = self.project_id, removed, "storyline deleted");
        self.refresh(RefreshTarget::Storyline).await?;
        Ok(removed)
    }

    pub async fn outlines(&self) -> Result<Vec<OutlineRecord>> {
        self.store.outlines(self.project_id).await
    }

    /// Saves episode outlines.
    ///
    /// With `overwrite` every outline and script of the project is removed
    /// first and numbering restarts at 1. Otherwise numbering starts at
    /// `start_episode`, or right after the highest saved episode. The assigned
    /// number replaces `episode_index` in each document, and every new outline
    /// gets an empty script named `Episode <n>`.
    pub async fn save_outlines(
        &self,
        docs: Vec<EpisodeOutline>,
        overwrite: bool,
        start_episode: Option<u32>,
    ) -> Result<OutlineSave> {
        let pid = self.project_id;

        let start = if overwrite {
            1
        } else if let Some(start) = start_episode {
            start
        } else {
            self.store.max_episode(pid).await?.map_or(1, |max| max + 1)
        };
        let episodes: Vec<u32> = (start..).take(docs.len()).collect();

        let batch: Vec<NewEpisode> = docs
            .into_iter()
            .zip(&episodes)
            .map(|(mut data, &episode)| {
                data.episode_index = episode;
                NewEpisode {
                    outline: NewOutline { episode, data },
                    script_name: format!("Episode {episode}"),
                }
            })
            .collect();

        let (removed, outline_ids, script_ids) =
            match self.store.save_outline_batch(pid, batch, overwrite).await? {
                OutlineBatch::Saved {
                    removed,
                    outline_ids,
                    script_ids,
                } => (removed, outline_ids, script_ids),
                OutlineBatch::Conflict { episodes } => {
                    tracing::info!(project_id = pid, ?episodes, "outline save conflicts with saved episodes");
                    return Ok(OutlineSave::Conflict { episodes });
                }
            };

        tracing::info!(
            project_id = pid,
            overwrite,
            removed,
            inserted = outline_ids.len(),
            scripts = script_ids.len(),
            start,
            "outlines saved"
        );
        self.refresh(RefreshTarget::Outline).await?;

        Ok(OutlineSave::Saved(OutlineSaveReport {
            removed,
            inserted: outline_ids.len(),
            scripts: script_ids.len(),
            episodes,
        }))
    }

    /// Replaces one outline's document. `None` when the id is not in this
    /// project; otherwise the episode number it is stored under.
    pub async fn update_outline(&self, id: i64, mut doc: EpisodeOutline) -> Result<Option<u32>> {
        let Some(existing) = self.store.outline(self.project_id, id).await? else {
            return Ok(None);
        };
        doc.episode_index = existing.episode;
        if self.store.update_outline(self.project_id, id, &doc).await? == 0 {
            return Ok(None);
        }
        tracing::info!(project_id = self.project_id, id, episode = existing.episode, "outline updated");
        self.refresh(RefreshTarget::Outline).await?;
        Ok(Some(existing.episode))
    }

    /// Deletes each outline and its script concurrently. One id failing
    /// does not affect the others.
    pub async fn delete_outlines(&self, ids: &[i64]) -> Result<Vec<DeleteStatus>> {
        let deletions = ids.iter().map(|&id| async move {
            let outcome = match self.delete_one(id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(id, error = %e, "outline delete failed");
                    DeleteOutcome::Failed(e.to_string())
                }
            };
            DeleteStatus { id, outcome }
        });
        let statuses = join_all(deletions).await;

        let deleted = statuses
            .iter()
            .filter(|s| matches!(s.outcome, DeleteOutcome::Deleted { .. }))
            .count();
        tracing::info!(project_id = self.project_id, requested = ids.len(), deleted, "outlines deleted");
        if deleted > 0 {
            self.refresh(RefreshTarget::Outline).await?;
        }
        Ok(statuses)
    }

    async fn delete_one(&self, id: i64) -> Result<DeleteOutcome> {
        let deletion = self.store.delete_outline_with_script(self.project_id, id).await?;
        Ok(if deletion.outlines == 0 {
            DeleteOutcome::NotFound
        } else {
            DeleteOutcome::Deleted {
                script_removed: deletion.scripts > 0,
            }
        })
    }

    /// Derives character, prop and scene assets from every saved outline.
    ///
    /// Entries are keyed by (kind, name); a later episode's description
    /// wins. Assets are inserted or updated, never deleted.
    pub async fn generate_assets(&self) -> Result<AssetReport> {
        let outlines = self.outlines().await?;

        let mut order: Vec<(AssetKind, String)> = Vec::new();
        let mut latest: HashMap<(AssetKind, String), String> = HashMap::new();
        for outline in &outlines {
            let groups: [(AssetKind, &[OutlineEntity]); 3] = [
                (AssetKind::Character, outline.data.characters.as_slice()),
                (AssetKind::Prop, outline.data.props.as_slice()),
                (AssetKind::Scene, outline.data.scenes.as_slice()),
            ];
            for (kind, entities) in groups {
                for entity in entities {
                    let name = entity.name.trim();
                    if name.is_empty() {
                        continue;
                    }
                    let key = (kind, name.to_string());
                    if latest
                        .insert(key.clone(), entity.description.clone())
                        .is_none()
                    {
                        order.push(key);
                    }
                }
            }
        }

        let mut report = AssetReport::default();
        for key in order {
            let description = latest.get(&key).cloned().unwrap_or_default();
            let (kind, name) = key;
            match self.store.asset(self.project_id, kind, &name).await? {
                None => {
                    self.store
                        .insert_asset(self.project_id, kind, &name, &description)
                        .await?;
                    report.inserted += 1;
                }
                Some(asset) if asset.description != description => {
                    self.store
                        .update_asset_description(asset.id, &description)
                        .await?;
                    report.updated += 1;
                }
                Some(_) => report.unchanged += 1,
            }
        }

        tracing::info!(
            project_id = self.project_id,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            "assets generated"
        );
        self.refresh(RefreshTarget::Assets).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyhive_bus::{EventBus, Topic};
    use storyhive_store::{NewProject, SqliteStore};

    async fn setup() -> (Arc<SqliteStore>, NarrativeManager, EventBus) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let project_id = store
            .create_project(NewProject {
                name: "Test".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let bus = EventBus::new(64);
        let manager = NarrativeManager::new(store.clone(), project_id, bus.publisher());
        (store, manager, bus)
    }

    fn doc(title: &str) -> EpisodeOutline {
        EpisodeOutline {
            episode_index: 99,
            title: title.into(),
            ..Default::default()
        }
    }

    fn docs(n: usize) -> Vec<EpisodeOutline> {
        (1..=n).map(|i| doc(&format!("ep {i}"))).collect()
    }

    fn install_trigger(store: &SqliteStore, sql: &str) {
        let db = store.db();
        let conn = db.lock().unwrap();
        conn.execute_batch(sql).unwrap();
    }

    fn saved(outcome: OutlineSave) -> OutlineSaveReport {
        match outcome {
            OutlineSave::Saved(report) => report,
            other => panic!("expected save, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn storyline_save_twice_keeps_one_record() {
        let (_store, manager, bus) = setup().await;
        let mut sub = bus.subscribe(&[Topic::Refresh]).await;

        assert_eq!(manager.save_storyline("first").await.unwrap(), StorylineSave::Created);
        assert_eq!(manager.save_storyline("second").await.unwrap(), StorylineSave::Replaced);
        assert_eq!(manager.storyline().await.unwrap().unwrap().content, "second");
        assert_eq!(
            sub.drain(),
            vec![
                EngineEvent::Refresh {
                    target: RefreshTarget::Storyline
                };
                2
            ]
        );

        assert!(manager.delete_storyline().await.unwrap());
        assert!(!manager.delete_storyline().await.unwrap());
    }

    #[tokio::test]
    async fn append_numbers_after_prior_max() {
        let (_store, manager, _bus) = setup().await;
        saved(manager.save_outlines(docs(2), false, None).await.unwrap());
        let report = saved(manager.save_outlines(docs(3), false, None).await.unwrap());
        assert_eq!(report.episodes, vec![3, 4, 5]);
        assert_eq!(report.removed, 0);

        let outlines = manager.outlines().await.unwrap();
        let numbers: Vec<u32> = outlines.iter().map(|o| o.episode).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert!(outlines.iter().all(|o| o.data.episode_index == o.episode));
    }

    #[tokio::test]
    async fn overwrite_restarts_numbering_with_scripts() {
        let (store, manager, _bus) = setup().await;
        saved(manager.save_outlines(docs(4), false, None).await.unwrap());
        let report = saved(manager.save_outlines(docs(2), true, Some(7)).await.unwrap());
        assert_eq!(report.removed, 4);
        assert_eq!(report.scripts, 2);
        assert_eq!(report.episodes, vec![1, 2]);

        let pid = manager.project_id();
        assert_eq!(store.count_outlines(pid).await.unwrap(), 2);
        let scripts = store.scripts(pid).await.unwrap();
        let names: Vec<&str> = scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Episode 1", "Episode 2"]);
        assert!(scripts.iter().all(|s| s.content.is_empty()));
    }

    #[tokio::test]
    async fn explicit_start_and_conflicts() {
        let (_store, manager, _bus) = setup().await;
        let report = saved(manager.save_outlines(docs(2), false, Some(10)).await.unwrap());
        assert_eq!(report.episodes, vec![10, 11]);

        let outcome = manager.save_outlines(docs(2), false, Some(11)).await.unwrap();
        assert_eq!(outcome, OutlineSave::Conflict { episodes: vec![11] });
        assert_eq!(manager.outlines().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_overwrite_leaves_prior_outlines_untouched() {
        let (store, manager, bus) = setup().await;
        saved(manager.save_outlines(docs(3), false, None).await.unwrap());
        install_trigger(
            &store,
            "CREATE TRIGGER outlines_offline BEFORE INSERT ON outlines \
             BEGIN SELECT RAISE(ABORT, 'outlines offline'); END;",
        );
        let mut sub = bus.subscribe(&[Topic::Refresh]).await;

        assert!(manager.save_outlines(docs(2), true, None).await.is_err());
        let pid = manager.project_id();
        assert_eq!(store.count_outlines(pid).await.unwrap(), 3);
        assert_eq!(store.count_scripts(pid).await.unwrap(), 3);
        assert!(sub.drain().is_empty());
    }

    #[tokio::test]
    async fn failed_script_creation_saves_no_outlines() {
        let (store, manager, _bus) = setup().await;
        install_trigger(
            &store,
            "CREATE TRIGGER scripts_offline BEFORE INSERT ON scripts \
             BEGIN SELECT RAISE(ABORT, 'scripts offline'); END;",
        );

        assert!(manager.save_outlines(docs(2), false, None).await.is_err());
        let pid = manager.project_id();
        assert_eq!(store.count_outlines(pid).await.unwrap(), 0);
        assert_eq!(store.count_scripts(pid).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_missing_outline_is_none() {
        let (_store, manager, _bus) = setup().await;
        assert_eq!(manager.update_outline(404, doc("x")).await.unwrap(), None);

        saved(manager.save_outlines(docs(1), false, None).await.unwrap());
        let id = manager.outlines().await.unwrap()[0].id;
        assert_eq!(manager.update_outline(id, doc("renamed")).await.unwrap(), Some(1));
        let outline = &manager.outlines().await.unwrap()[0];
        assert_eq!(outline.data.title, "renamed");
        assert_eq!(outline.data.episode_index, 1);
    }

    #[tokio::test]
    async fn delete_reports_per_id() {
        let (store, manager, _bus) = setup().await;
        saved(manager.save_outlines(docs(2), false, None).await.unwrap());
        let ids: Vec<i64> = manager.outlines().await.unwrap().iter().map(|o| o.id).collect();

        let statuses = manager.delete_outlines(&[ids[0], 999]).await.unwrap();
        assert_eq!(
            statuses,
            vec![
                DeleteStatus {
                    id: ids[0],
                    outcome: DeleteOutcome::Deleted {
                        script_removed: true
                    }
                },
                DeleteStatus {
                    id: 999,
                    outcome: DeleteOutcome::NotFound
                },
            ]
        );
        let pid = manager.project_id();
        assert_eq!(store.count_outlines(pid).await.unwrap(), 1);
        assert_eq!(store.count_scripts(pid).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn one_failing_delete_does_not_cancel_the_rest() {
        let (store, manager, _bus) = setup().await;
        saved(manager.save_outlines(docs(3), false, None).await.unwrap());
        let ids: Vec<i64> = manager.outlines().await.unwrap().iter().map(|o| o.id).collect();
        install_trigger(
            &store,
            &format!(
                "CREATE TRIGGER outline_locked BEFORE DELETE ON outlines WHEN OLD.id = {} \
                 BEGIN SELECT RAISE(ABORT, 'outline locked'); END;",
                ids[1]
            ),
        );

        let statuses = manager.delete_outlines(&ids).await.unwrap();
        assert_eq!(statuses.len(), 3);
        assert_eq!(
            statuses[0].outcome,
            DeleteOutcome::Deleted {
                script_removed: true
            }
        );
        assert!(
            matches!(&statuses[1].outcome, DeleteOutcome::Failed(e) if e.contains("outline locked")),
            "got {:?}",
            statuses[1]
        );
        assert_eq!(
            statuses[2].outcome,
            DeleteOutcome::Deleted {
                script_removed: true
            }
        );

        let pid = manager.project_id();
        let remaining = manager.outlines().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ids[1]);
        assert_eq!(store.count_scripts(pid).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn assets_dedup_last_wins_and_rerun_is_stable() {
        let (store, manager, _bus) = setup().await;
        let entity = |name: &str, description: &str| OutlineEntity {
            name: name.into(),
            description: description.into(),
        };
        let mut first = doc("one");
        first.characters = vec![entity("Lin", "courier"), entity("Mo", "smuggler")];
        first.scenes = vec![entity("Harbor", "foggy")];
        let mut second = doc("two");
        second.characters = vec![entity("Lin", "captain")];
        second.props = vec![entity("Lantern", "brass")];
        saved(manager.save_outlines(vec![first, second], false, None).await.unwrap());

        let report = manager.generate_assets().await.unwrap();
        assert_eq!(
            report,
            AssetReport {
                inserted: 4,
                updated: 0,
                unchanged: 0
            }
        );
        let lin = store
            .asset(manager.project_id(), AssetKind::Character, "Lin")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lin.description, "captain");

        let rerun = manager.generate_assets().await.unwrap();
        assert_eq!(
            rerun,
            AssetReport {
                inserted: 0,
                updated: 0,
                unchanged: 4
            }
        );
    }

    #[tokio::test]
    async fn asset_description_change_is_an_update() {
        let (_store, manager, _bus) = setup().await;
        let mut first = doc("one");
        first.props = vec![OutlineEntity {
            name: "Map".into(),
            description: "torn".into(),
        }];
        saved(manager.save_outlines(vec![first], false, None).await.unwrap());
        manager.generate_assets().await.unwrap();

        let id = manager.outlines().await.unwrap()[0].id;
        let mut revised = doc("one");
        revised.props = vec![OutlineEntity {
            name: "Map".into(),
            description: "mended".into(),
        }];
        manager.update_outline(id, revised).await.unwrap();

        let report = manager.generate_assets().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 0);
    }
}
