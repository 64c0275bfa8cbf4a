use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use engram_core::hooks::{
    self, SessionEndTrigger, SessionStartTrigger, UserPromptTrigger,
};
use engram_lifecycle::SessionLifecycle;
use engram_store::search::SearchRepo;
use engram_store::Database;
use engram_worker::{
    JobRegistry, ServerConfig, SpawnCommand, WorkerConfig, WorkerCoordinator,
    DEFAULT_WORKER_PORT,
};

#[derive(Parser)]
#[command(name = "engram", about = "Session memory store for coding agents")]
struct Cli {
    /// Database path. Defaults to ~/.engram/database/engram.db
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the background worker server.
    Worker {
        #[arg(long, default_value_t = DEFAULT_WORKER_PORT)]
        port: u16,
    },
    /// Handle a host hook; the payload is read from stdin.
    Hook {
        #[command(subcommand)]
        kind: HookKind,
    },
    /// Print recent context for a project as JSON.
    Context {
        #[arg(long)]
        project: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum HookKind {
    SessionStart,
    UserPrompt,
    SessionEnd,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let db = Database::open(&db_path).expect("failed to open database");

    match cli.command {
        Command::Worker { port } => run_worker(port).await,
        Command::Hook { kind } => run_hook(db, kind).await,
        Command::Context { project, limit } => run_context(db, &project, limit),
    }
}

async fn run_worker(port: u16) {
    let registry = std::sync::Arc::new(JobRegistry::new());
    let handle = engram_worker::server::start(ServerConfig { port }, registry)
        .await
        .expect("failed to start worker server");
    tracing::info!(port = handle.port, "worker ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("worker shutting down");
}

/// Hooks fail closed: a malformed payload or store error is logged and the
/// process still exits zero so the host session is never blocked.
async fn run_hook(db: Database, kind: HookKind) {
    let mut raw = String::new();
    if std::io::stdin().read_to_string(&mut raw).is_err() {
        tracing::warn!("could not read hook payload, continuing");
        return;
    }

    let lifecycle = SessionLifecycle::new(db, coordinator());

    match kind {
        HookKind::SessionStart => {
            let Some(trigger) = hooks::parse_trigger::<SessionStartTrigger>(&raw) else {
                tracing::warn!("malformed session-start payload, continuing");
                return;
            };
            let project = hooks::project_from_cwd(&trigger.cwd);
            match lifecycle.begin(
                &trigger.session_id,
                &project,
                trigger.conversation_id.as_deref(),
            ) {
                Ok(session) => {
                    if let Err(e) = lifecycle.prepare_worker(&session.session_id).await {
                        tracing::warn!(error = %e, "could not record worker port");
                    }
                }
                Err(e) => tracing::error!(
                    session_id = %trigger.session_id,
                    error = %e,
                    "session start failed"
                ),
            }
        }
        HookKind::UserPrompt => {
            let Some(trigger) = hooks::parse_trigger::<UserPromptTrigger>(&raw) else {
                tracing::warn!("malformed user-prompt payload, continuing");
                return;
            };
            if let Err(e) = lifecycle.record_prompt(&trigger.session_id, &trigger.prompt) {
                tracing::error!(
                    session_id = %trigger.session_id,
                    error = %e,
                    "prompt record failed"
                );
            }
        }
        HookKind::SessionEnd => {
            let Some(trigger) = hooks::parse_trigger::<SessionEndTrigger>(&raw) else {
                tracing::warn!("malformed session-end payload, continuing");
                return;
            };
            match lifecycle.end(&trigger.session_id, trigger.reason).await {
                Ok(outcome) => {
                    if let Ok(json) = serde_json::to_string(&outcome) {
                        println!("{json}");
                    }
                }
                Err(e) => tracing::error!(
                    session_id = %trigger.session_id,
                    reason = %trigger.reason,
                    error = %e,
                    "session end failed"
                ),
            }
        }
    }
}

fn run_context(db: Database, project: &str, limit: u32) {
    let search = SearchRepo::new(db);
    match search.recent_context(project, limit) {
        Ok(items) => {
            let json = serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string());
            println!("{json}");
        }
        Err(e) => {
            tracing::error!(project, error = %e, "context query failed");
            std::process::exit(1);
        }
    }
}

fn coordinator() -> WorkerCoordinator {
    let spawn = std::env::current_exe().ok().map(|exe| SpawnCommand {
        program: exe.display().to_string(),
        args: vec!["worker".to_string()],
    });
    WorkerCoordinator::new(WorkerConfig {
        spawn,
        ..Default::default()
    })
}

fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".engram")
        .join("database")
        .join("engram.db")
}
