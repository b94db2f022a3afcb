use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use storyhive_bus::{EventBus, Subscription};
use storyhive_core::{
    ChapterHeading, ChapterSource, EngineSettings, GetChapterTool, LoadedChapters, Orchestrator,
    Speaker, ToolContext, ToolExecutor, MISCONFIGURED_PROMPT,
};
use storyhive_provider::{ContentBlock, LlmRequest, ScriptedProvider, ScriptedReply};
use storyhive_schema::{AgentRole, Chapter, EngineEvent, RefreshTarget};
use storyhive_store::{NewProject, RecordStore, SqliteStore};

struct Harness {
    store: Arc<SqliteStore>,
    provider: Arc<ScriptedProvider>,
    engine: Orchestrator,
    events: Subscription,
    project_id: i64,
}

fn chapter(project_id: i64, index: u32) -> Chapter {
    Chapter {
        project_id,
        index,
        volume: 1,
        title: format!("Chapter title {index}"),
        content: format!("Chapter body {index}"),
    }
}

async fn harness_with(
    replies: Vec<ScriptedReply>,
    chapters: Option<Arc<dyn ChapterSource>>,
    settings: EngineSettings,
) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let project_id = store
        .create_project(NewProject {
            name: "The Ferryman".into(),
            synopsis: "A ferryman hides a fugitive.".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let chapters: Arc<dyn ChapterSource> = match chapters {
        Some(chapters) => chapters,
        None => Arc::new(LoadedChapters::new(
            (1..=5).map(|i| chapter(project_id, i)).collect(),
        )),
    };

    let bus = EventBus::new(4096);
    let events = bus.subscribe_all().await;
    let provider = Arc::new(ScriptedProvider::new(replies));
    let engine = Orchestrator::new(
        provider.clone(),
        store.clone(),
        chapters,
        project_id,
        bus.publisher(),
        settings,
    );
    Harness {
        store,
        provider,
        engine,
        events,
        project_id,
    }
}

async fn harness(replies: Vec<ScriptedReply>) -> Harness {
    harness_with(replies, None, EngineSettings::default()).await
}

fn tool_results(request: &LlmRequest) -> Vec<(String, bool)> {
    request
        .messages
        .last()
        .map(|m| {
            m.content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult {
                        content, is_error, ..
                    } => Some((content.clone(), *is_error)),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Serves chapters after a delay proportional to the chapter number.
struct SlowChapters {
    inner: LoadedChapters,
}

#[async_trait]
impl ChapterSource for SlowChapters {
    fn headings(&self) -> Vec<ChapterHeading> {
        self.inner.headings()
    }

    async fn chapter(&self, index: u32) -> Result<Option<Chapter>> {
        tokio::time::sleep(Duration::from_millis(10 * u64::from(index))).await;
        self.inner.chapter(index).await
    }
}

struct BrokenChapters;

#[async_trait]
impl ChapterSource for BrokenChapters {
    fn headings(&self) -> Vec<ChapterHeading> {
        vec![]
    }

    async fn chapter(&self, _index: u32) -> Result<Option<Chapter>> {
        Err(anyhow!("chapter archive unavailable"))
    }
}

#[tokio::test]
async fn chapters_come_back_in_request_order() {
    let source = SlowChapters {
        inner: LoadedChapters::new((1..=5).map(|i| chapter(1, i)).collect()),
    };
    let tool = GetChapterTool::new(Arc::new(source));
    let out = tool
        .execute(json!({"chapters": [5, 1, 3]}), &ToolContext::new(AgentRole::Main))
        .await
        .unwrap();

    let headers: Vec<&str> = out
        .content
        .lines()
        .filter(|l| l.starts_with("## "))
        .collect();
    assert_eq!(
        headers,
        vec![
            "## Chapter 5 (Vol.1): Chapter title 5",
            "## Chapter 1 (Vol.1): Chapter title 1",
            "## Chapter 3 (Vol.1): Chapter title 3",
        ]
    );
}

#[tokio::test]
async fn plain_reply_streams_data_then_response() {
    let mut h = harness(vec![ScriptedReply::text("Let us begin.")]).await;

    let reply = h.engine.call("Adapt this novel").await.unwrap();
    assert_eq!(reply, "Let us begin.");

    let events = h.events.drain();
    assert_eq!(
        events,
        vec![
            EngineEvent::Data {
                text: "Let ".into()
            },
            EngineEvent::Data { text: "us ".into() },
            EngineEvent::Data {
                text: "begin.".into()
            },
            EngineEvent::Response {
                text: "Let us begin.".into()
            },
        ]
    );

    let history = h.engine.history().snapshot().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].speaker, Speaker::User);
    assert_eq!(history[1].text, "Let us begin.");
}

#[tokio::test]
async fn system_prompt_uses_template_and_environment() {
    let h = harness(vec![ScriptedReply::text("ok"), ScriptedReply::text("ok")]).await;

    h.engine.call("first").await.unwrap();
    let system = h.provider.requests()[0].system.clone().unwrap();
    assert!(system.starts_with(MISCONFIGURED_PROMPT));
    assert!(system.contains("Name: The Ferryman"));
    assert!(system.contains("- [5] Vol.1 Chapter title 5"));

    h.store
        .set_prompt_custom("outline_agent.main", Some("You run the writers room."))
        .await
        .unwrap();
    h.engine.call("second").await.unwrap();
    let second = &h.provider.requests()[1];
    assert!(second
        .system
        .as_deref()
        .unwrap()
        .starts_with("You run the writers room.\n\n# Project"));
    // user, assistant, user
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.tools.len(), 12);
}

#[tokio::test]
async fn tool_call_event_precedes_tool_side_effects() {
    let mut h = harness(vec![
        ScriptedReply::text("Saving. ").with_tool("saveStoryline", json!({"content": "A quiet river."})),
        ScriptedReply::text("Saved."),
    ])
    .await;

    h.engine.call("save a storyline").await.unwrap();
    let events = h.events.drain();

    let call_pos = events
        .iter()
        .position(|e| {
            *e == EngineEvent::ToolCall {
                agent: AgentRole::Main,
                name: "saveStoryline".into(),
            }
        })
        .unwrap();
    let refresh_pos = events
        .iter()
        .position(|e| {
            *e == EngineEvent::Refresh {
                target: RefreshTarget::Storyline,
            }
        })
        .unwrap();
    assert!(call_pos < refresh_pos);
    assert_eq!(
        events.last(),
        Some(&EngineEvent::Response {
            text: "Saving. Saved.".into()
        })
    );

    let storyline = h.store.storyline(h.project_id).await.unwrap().unwrap();
    assert_eq!(storyline.content, "A quiet river.");
}

#[tokio::test]
async fn delegation_runs_persona_turn_and_appends_history() {
    let mut h = harness(vec![
        // main
        ScriptedReply::tool("AI1", json!({"task": "Write the storyline for chapters 1-5"})),
        // AI1
        ScriptedReply::tool("saveStoryline", json!({"content": "The ferryman's choice."})),
        ScriptedReply::text("Storyline saved."),
        // main
        ScriptedReply::text("AI1 wrote the storyline."),
    ])
    .await;
    h.store
        .set_prompt_default("outline_agent.ai1", "You write storylines.")
        .await
        .unwrap();

    let reply = h.engine.call("Start with the storyline").await.unwrap();
    assert_eq!(reply, "AI1 wrote the storyline.");

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 4);

    let sub = &requests[1];
    assert_eq!(sub.system.as_deref(), Some("You write storylines."));
    assert_eq!(sub.messages.len(), 1);
    let payload = sub.messages[0].text();
    assert!(payload.contains("user: Start with the storyline"));
    assert!(payload.ends_with("# Task\nWrite the storyline for chapters 1-5"));
    let sub_tools: Vec<&str> = sub.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        sub_tools,
        vec![
            "getChapter",
            "getStoryline",
            "saveStoryline",
            "getOutline",
            "saveOutline",
            "updateOutline"
        ]
    );

    assert_eq!(
        tool_results(&requests[3]),
        vec![("Storyline saved.".to_string(), false)]
    );

    let events = h.events.drain();
    let expected_prefix = vec![
        EngineEvent::ToolCall {
            agent: AgentRole::Main,
            name: "AI1".into(),
        },
        EngineEvent::Transfer {
            to: AgentRole::StorylineAuthor,
        },
        EngineEvent::ToolCall {
            agent: AgentRole::StorylineAuthor,
            name: "saveStoryline".into(),
        },
        EngineEvent::Refresh {
            target: RefreshTarget::Storyline,
        },
        EngineEvent::SubAgentStream {
            agent: AgentRole::StorylineAuthor,
            text: "Storyline ".into(),
        },
        EngineEvent::SubAgentStream {
            agent: AgentRole::StorylineAuthor,
            text: "saved.".into(),
        },
        EngineEvent::SubAgentEnd {
            agent: AgentRole::StorylineAuthor,
        },
    ];
    assert_eq!(&events[..expected_prefix.len()], expected_prefix.as_slice());
    assert!(matches!(events.last(), Some(EngineEvent::Response { .. })));

    let history = h.engine.history().snapshot().await;
    let entries: Vec<(Speaker, Option<AgentRole>, &str)> = history
        .iter()
        .map(|e| (e.speaker, e.agent, e.text.as_str()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (Speaker::User, None, "Start with the storyline"),
            (
                Speaker::Assistant,
                Some(AgentRole::StorylineAuthor),
                "Storyline saved."
            ),
            (
                Speaker::Assistant,
                Some(AgentRole::Main),
                "AI1 wrote the storyline."
            ),
        ]
    );
}

#[tokio::test]
async fn unconfigured_persona_gets_misconfigured_prompt() {
    let h = harness(vec![
        ScriptedReply::tool("director", json!({"task": "Review the outline"})),
        ScriptedReply::text("I am misconfigured."),
        ScriptedReply::text("The director is not set up."),
    ])
    .await;

    h.engine.call("Review please").await.unwrap();
    let requests = h.provider.requests();
    assert_eq!(requests[1].system.as_deref(), Some(MISCONFIGURED_PROMPT));
}

#[tokio::test]
async fn validation_failure_is_reported_to_model_without_mutation() {
    let h = harness(vec![
        ScriptedReply::tool("saveOutline", json!({"episodes": [], "overwrite": true})),
        ScriptedReply::text("Sorry, retrying later."),
    ])
    .await;
    h.store
        .insert_outlines(
            h.project_id,
            vec![storyhive_schema::NewOutline {
                episode: 1,
                data: storyhive_schema::EpisodeOutline {
                    title: "kept".into(),
                    ..Default::default()
                },
            }],
        )
        .await
        .unwrap();

    let reply = h.engine.call("save nothing").await.unwrap();
    assert_eq!(reply, "Sorry, retrying later.");

    let results = tool_results(&h.provider.requests()[1]);
    assert_eq!(results.len(), 1);
    assert!(results[0].1);
    assert!(results[0].0.contains("invalid input for saveOutline"));
    assert_eq!(h.store.count_outlines(h.project_id).await.unwrap(), 1);
}

#[tokio::test]
async fn upstream_failure_propagates_and_engine_stays_usable() {
    let mut h = harness_with(
        vec![
            ScriptedReply::tool("getChapter", json!({"chapters": [1]})),
            ScriptedReply::text("never sent"),
            ScriptedReply::text("Recovered."),
        ],
        Some(Arc::new(BrokenChapters)),
        EngineSettings::default(),
    )
    .await;

    let err = h.engine.call("read chapter one").await.unwrap_err();
    assert!(format!("{err:#}").contains("chapter archive unavailable"));
    let events = h.events.drain();
    assert!(!events
        .iter()
        .any(|e| matches!(e, EngineEvent::Response { .. })));

    let history = h.engine.history().snapshot().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "read chapter one");

    // the unanswered reply is consumed by the next turn
    assert_eq!(h.engine.call("try again").await.unwrap(), "never sent");
    assert_eq!(h.engine.history().len().await, 3);
}

#[tokio::test]
async fn provider_that_always_calls_tools_is_halted_at_budget() {
    let replies = (0..50)
        .map(|_| ScriptedReply::tool("getOutline", json!({"simplified": true})))
        .collect();
    let settings = EngineSettings {
        max_steps: 4,
        ..EngineSettings::default()
    };
    let mut h = harness_with(replies, None, settings).await;

    let reply = h.engine.call("loop forever").await.unwrap();
    assert_eq!(reply, "");
    assert_eq!(h.provider.requests().len(), 4);

    let tool_calls = h
        .events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::ToolCall { .. }))
        .count();
    assert_eq!(tool_calls, 4);
}

#[tokio::test]
async fn outline_lifecycle_through_the_engine() {
    let episodes: Vec<serde_json::Value> = (1..=3)
        .map(|i| json!({"title": format!("Episode draft {i}"), "episodeIndex": 40 + i}))
        .collect();
    let h = harness(vec![
        ScriptedReply::tool("saveOutline", json!({"episodes": episodes, "overwrite": false})),
        ScriptedReply::tool(
            "saveOutline",
            json!({"episodes": [{"title": "Fresh start"}, {"title": "Second"}], "overwrite": true}),
        ),
        ScriptedReply::tool("deleteOutline", json!({"ids": [1, 5, 999]})),
        ScriptedReply::text("Outline rebuilt."),
    ])
    .await;

    h.engine.call("build and rebuild the outline").await.unwrap();
    let requests = h.provider.requests();

    assert_eq!(
        tool_results(&requests[1])[0].0,
        "Saved 3 episode(s), numbered 1-3, with 3 empty script(s). Removed 0 existing outline(s)."
    );
    assert_eq!(
        tool_results(&requests[2])[0].0,
        "Saved 2 episode(s), numbered 1-2, with 2 empty script(s). Removed 3 existing outline(s)."
    );

    // overwrite inserted ids 4 and 5
    let delete_summary = &tool_results(&requests[3])[0].0;
    assert!(delete_summary.starts_with("Deleted 1 of 3 outline(s)."));
    assert!(delete_summary.contains("id 1: not found"));
    assert!(delete_summary.contains("id 5: deleted with its script"));
    assert!(delete_summary.contains("id 999: not found"));

    let outlines = h.store.outlines(h.project_id).await.unwrap();
    assert_eq!(outlines.len(), 1);
    assert_eq!(outlines[0].episode, 1);
    assert_eq!(outlines[0].data.episode_index, 1);
    assert_eq!(h.store.count_scripts(h.project_id).await.unwrap(), 1);
}
