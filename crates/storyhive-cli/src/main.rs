use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod ingest;

use storyhive_bus::EventBus;
use storyhive_core::*;
use storyhive_provider::{register_builtin_providers, LlmProvider, ProviderRegistry};
use storyhive_schema::EngineEvent;
use storyhive_store::{NewProject, RecordStore, SqliteStore};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "storyhive", version, about = "storyhive novel-to-outline agent engine")]
struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Config root directory (contains config/ and prompts/)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Validate config files")]
    Validate,
    #[command(about = "Create the database and apply migrations")]
    Init,
    #[command(subcommand, about = "Project management")]
    Project(ProjectCommands),
    #[command(about = "Import a directory of .txt chapters into a project")]
    Ingest {
        #[arg(long, help = "Project ID")]
        project: i64,
        #[arg(help = "Directory with one .txt file per chapter")]
        dir: PathBuf,
    },
    #[command(subcommand, about = "Persona prompt templates")]
    Prompts(PromptCommands),
    #[command(about = "Print the saved episode outlines")]
    Outline {
        #[arg(long, help = "Project ID")]
        project: i64,
        #[arg(long, help = "Only list ids, episode numbers and titles")]
        simplified: bool,
    },
    #[command(about = "Print the project's derived assets")]
    Assets {
        #[arg(long, help = "Project ID")]
        project: i64,
    },
    #[command(about = "Interactive outline session for one project")]
    Chat {
        #[arg(long, help = "Project ID")]
        project: i64,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    #[command(about = "Create a project and print its ID")]
    Create {
        #[arg(long, help = "Project name")]
        name: String,
        #[arg(long, default_value = "")]
        synopsis: String,
        #[arg(long, default_value = "")]
        genre: String,
        #[arg(long, default_value = "", help = "Target visual/narrative style")]
        style: String,
        #[arg(long, default_value = "", help = "e.g. 9:16")]
        aspect_ratio: String,
    },
    #[command(about = "Show project details")]
    Show {
        #[arg(help = "Project ID")]
        project: i64,
    },
}

#[derive(Subcommand)]
enum PromptCommands {
    #[command(about = "Load <code>.md defaults from the prompts directory")]
    Import {
        #[arg(long, help = "Defaults to <config-root>/prompts")]
        dir: Option<PathBuf>,
    },
    #[command(about = "Set or clear the custom override for a prompt code")]
    Set {
        #[arg(help = "Prompt code, e.g. outline_agent.director")]
        code: String,
        #[arg(help = "File with the override text")]
        file: Option<PathBuf>,
        #[arg(long, help = "Clear the override and fall back to the default")]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    if cli.config_root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.config_root = PathBuf::from(home).join(
                cli.config_root
                    .strip_prefix("~")
                    .unwrap_or(&cli.config_root),
            );
        }
    }

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "storyhive.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let root = cli.config_root.as_path();
    match command {
        Commands::Validate => {
            let config = load_config(&root.join("config"))?;
            println!(
                "Config valid. provider={}, model={}, max_steps={}, sub_agent_max_steps={}.",
                config.model.provider,
                config.model.model,
                config.engine.max_steps,
                config.engine.sub_agent_max_steps
            );
        }
        Commands::Init => {
            let config = load_config(&root.join("config"))?;
            let path = database_path(root, &config)?;
            SqliteStore::open(&path)?;
            println!("Database ready at {path}");
        }
        Commands::Project(cmd) => {
            let store = open_store(root)?;
            match cmd {
                ProjectCommands::Create {
                    name,
                    synopsis,
                    genre,
                    style,
                    aspect_ratio,
                } => {
                    let id = store
                        .create_project(NewProject {
                            name: name.clone(),
                            synopsis,
                            genre,
                            style,
                            aspect_ratio,
                        })
                        .await?;
                    println!("Project '{name}' created with ID {id}.");
                }
                ProjectCommands::Show { project } => {
                    let found = store
                        .project(project)
                        .await?
                        .ok_or_else(|| anyhow!("project not found: {project}"))?;
                    println!("Project: {} (ID {})", found.name, found.id);
                    println!("Synopsis: {}", found.synopsis);
                    println!("Genre: {}", found.genre);
                    println!("Style: {}", found.style);
                    println!("Aspect ratio: {}", found.aspect_ratio);
                    println!("Chapters: {}", store.chapters(project).await?.len());
                    println!("Outlines: {}", store.count_outlines(project).await?);
                }
            }
        }
        Commands::Ingest { project, dir } => {
            let store = open_store(root)?;
            ensure_project(&store, project).await?;
            let chapters = ingest::read_chapter_dir(&dir, project)?;
            let inserted = store.insert_chapters(chapters).await?;
            println!("Imported {inserted} chapter(s) into project {project}.");
        }
        Commands::Prompts(cmd) => {
            let store: Arc<dyn RecordStore> = Arc::new(open_store(root)?);
            let prompts = PromptLibrary::new(store);
            match cmd {
                PromptCommands::Import { dir } => {
                    let dir = dir.unwrap_or_else(|| root.join("prompts"));
                    let count = prompts.import_defaults(&dir).await?;
                    println!("Imported {count} prompt default(s) from {}.", dir.display());
                }
                PromptCommands::Set { code, file, clear } => match (file, clear) {
                    (_, true) => {
                        prompts.set_custom(&code, None).await?;
                        println!("Override for '{code}' cleared.");
                    }
                    (Some(file), false) => {
                        let text = std::fs::read_to_string(&file).with_context(|| {
                            format!("failed to read prompt file: {}", file.display())
                        })?;
                        prompts.set_custom(&code, Some(text.trim())).await?;
                        println!("Override for '{code}' set.");
                    }
                    (None, false) => {
                        return Err(anyhow!("either --file or --clear is required"));
                    }
                },
            }
        }
        Commands::Outline {
            project,
            simplified,
        } => {
            let store = open_store(root)?;
            let outlines = store.outlines(project).await?;
            if outlines.is_empty() {
                println!("No outline saved yet.");
            } else if simplified {
                println!("{:<8} {:<8} {:<40}", "ID", "EPISODE", "TITLE");
                println!("{}", "-".repeat(60));
                for record in &outlines {
                    println!(
                        "{:<8} {:<8} {:<40}",
                        record.id, record.episode, record.data.title
                    );
                }
            } else {
                for record in &outlines {
                    println!("{}", record.data.render(record.episode));
                }
            }
        }
        Commands::Assets { project } => {
            let store = open_store(root)?;
            let assets = store.assets(project).await?;
            if assets.is_empty() {
                println!("No assets generated yet.");
            } else {
                println!("{:<10} {:<24} {:<50}", "KIND", "NAME", "DESCRIPTION");
                println!("{}", "-".repeat(84));
                for asset in &assets {
                    println!(
                        "{:<10} {:<24} {:<50}",
                        asset.kind.as_str(),
                        asset.name,
                        asset.description
                    );
                }
            }
        }
        Commands::Chat { project } => {
            run_repl(root, project).await?;
        }
    }

    Ok(())
}

/// Relative database paths resolve against the config root.
fn database_path(root: &Path, config: &StoryhiveConfig) -> Result<String> {
    let path = PathBuf::from(&config.database.path);
    let path = if path.is_absolute() {
        path
    } else {
        root.join(path)
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("database path is not valid UTF-8: {}", path.display()))
}

fn open_store(root: &Path) -> Result<SqliteStore> {
    let config = load_config(&root.join("config"))?;
    SqliteStore::open(&database_path(root, &config)?)
}

async fn ensure_project(store: &SqliteStore, project: i64) -> Result<()> {
    store
        .project(project)
        .await?
        .map(|_| ())
        .ok_or_else(|| anyhow!("project not found: {project}"))
}

const RESPONSE_WAIT: Duration = Duration::from_secs(5);

struct Bootstrap {
    bus: EventBus,
    engine: Orchestrator,
}

async fn bootstrap(root: &Path, project: i64) -> Result<Bootstrap> {
    let config = load_config(&root.join("config"))?;
    let store = Arc::new(SqliteStore::open(&database_path(root, &config)?)?);
    ensure_project(&store, project).await?;

    let mut registry = ProviderRegistry::new();
    register_builtin_providers(&mut registry);
    let provider: Arc<dyn LlmProvider> = registry.get(&config.model.provider)?;

    let chapters = LoadedChapters::load(store.as_ref(), project).await?;
    tracing::info!(project, chapters = chapters.len(), "chapters loaded");

    let bus = EventBus::new(config.engine.bus_capacity);
    let engine = Orchestrator::new(
        provider,
        store,
        Arc::new(chapters),
        project,
        bus.publisher(),
        EngineSettings::from_config(&config),
    );
    Ok(Bootstrap { bus, engine })
}

async fn run_repl(root: &Path, project: i64) -> Result<()> {
    let Bootstrap { bus, engine } = bootstrap(root, project).await?;

    let mut subscription = bus.subscribe_all().await;
    let subscription_id = subscription.id();
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
    let printer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let finished = matches!(event, EngineEvent::Response { .. });
            print_event(&event);
            if finished {
                if let Err(mpsc::error::TrySendError::Closed(_)) = done_tx.try_send(()) {
                    break;
                }
            }
        }
    });

    println!("storyhive REPL for project {project}. Type 'quit' to exit.");
    println!("---");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        while done_rx.try_recv().is_ok() {}
        match engine.call(input).await {
            Ok(reply) => {
                if !wait_for_response(&mut done_rx, RESPONSE_WAIT).await {
                    tracing::warn!("response event not delivered, printing reply directly");
                    print!("{reply}");
                }
                println!();
            }
            Err(err) => eprintln!("Error: {err:#}"),
        }
    }

    bus.unsubscribe(subscription_id).await;
    printer.abort();
    Ok(())
}

/// Whether the printer saw the turn's `Response` event within `wait`. The bus
/// drops events for a full subscriber, so the signal may never come.
async fn wait_for_response(done_rx: &mut mpsc::Receiver<()>, wait: Duration) -> bool {
    matches!(tokio::time::timeout(wait, done_rx.recv()).await, Ok(Some(())))
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Data { text } => {
            print!("{text}");
        }
        EngineEvent::SubAgentStream { agent, text } => {
            print!("[{agent}] {text}");
        }
        EngineEvent::ToolCall { agent, name } => {
            println!("\n  ({agent} -> {name})");
        }
        EngineEvent::Transfer { to } => {
            println!("\n  -- handing over to {to} --");
        }
        EngineEvent::SubAgentEnd { agent } => {
            println!("\n  -- {agent} done --");
        }
        EngineEvent::Refresh { target } => {
            tracing::debug!(?target, "refresh");
        }
        EngineEvent::Response { .. } => {}
    }
    let _ = std::io::stdout().flush();
}
