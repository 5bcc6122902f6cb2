//! deepresearch CLI
//!
//! The `research` command drives guarded, resumable research workflows.
//!
//! ## Commands
//!
//! - `ask`: start a workflow on a thread
//! - `resume`: answer an outstanding interrupt
//! - `recover`: continue a workflow that stopped mid-way
//! - `show`: print a thread's stored snapshot
//! - `threads`: list threads with a stored workflow

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deepresearch_core::metrics::METRICS;
use deepresearch_core::{
    content_guard, init_tracing, AgentResearchWorker, CheckpointStore, Decision, EngineConfig,
    Orchestrator, Outcome, PlannerKind, ReasoningClassifier, ReasoningPlanner,
    ReasoningService, ResumeRequest, SearchProvider, ThreadId, TopicPlanner, WorkflowState,
};
use deepresearch_providers::{ProviderConfig, Providers};
use deepresearch_state::{DbTarget, SurrealCheckpointStore};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "research")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Guarded, resumable deep research", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "DEEPRESEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Checkpoint database: a SurrealDB URL or a local directory
    /// (default: resolved from SURREALDB_* variables)
    #[arg(long, global = true, env = "DEEPRESEARCH_DB")]
    db: Option<String>,

    /// Emit JSON log lines and JSON results
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a research question on a thread
    Ask {
        /// Conversation thread
        #[arg(short, long)]
        thread: String,

        /// The request
        message: String,
    },

    /// Answer the thread's outstanding interrupt
    Resume {
        #[arg(short, long)]
        thread: String,

        /// approve or reject
        decision: Decision,

        /// Token from the interrupt prompt; must match when given
        #[arg(long)]
        token: Option<String>,
    },

    /// Continue a workflow from its last checkpoint
    Recover {
        #[arg(short, long)]
        thread: String,
    },

    /// Show a thread's stored workflow
    Show {
        #[arg(short, long)]
        thread: String,
    },

    /// List threads with a stored workflow
    Threads,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config =
        EngineConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    let store = open_store(cli.db.as_deref())
        .await
        .context("Failed to open checkpoint store")?;

    let result = run(cli.command, config, store, cli.json).await;
    METRICS.flush();
    result
}

async fn run(
    command: Commands,
    config: EngineConfig,
    store: Arc<dyn CheckpointStore>,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Ask { thread, message } => {
            let engine = build_orchestrator(config, store)?;
            cmd_ask(&engine, &ThreadId::new(thread), &message, json).await?;
        }
        Commands::Resume {
            thread,
            decision,
            token,
        } => {
            let engine = build_orchestrator(config, store)?;
            let mut request = ResumeRequest::new(ThreadId::new(thread), decision);
            if let Some(token) = token {
                request = request.with_token(token);
            }
            cmd_resume(&engine, &request, json).await?;
        }
        Commands::Recover { thread } => {
            let engine = build_orchestrator(config, store)?;
            cmd_recover(&engine, &ThreadId::new(thread), json).await?;
        }
        Commands::Show { thread } => cmd_show(store.as_ref(), &ThreadId::new(thread), json).await?,
        Commands::Threads => cmd_threads(store.as_ref(), json).await?,
    }
    Ok(())
}

/// Open the checkpoint store named by `db`, or resolve one from the environment.
async fn open_store(db: Option<&str>) -> Result<Arc<dyn CheckpointStore>> {
    let target = db.map(DbTarget::parse).unwrap_or_else(DbTarget::from_env);
    Ok(Arc::new(SurrealCheckpointStore::new(target.open().await?)))
}

/// Wire HTTP providers into an orchestrator.
fn build_orchestrator(config: EngineConfig, store: Arc<dyn CheckpointStore>) -> Result<Orchestrator> {
    let provider_config = ProviderConfig::from_env().context("Invalid provider configuration")?;
    let providers = Providers::from_config(&provider_config)?;

    let reasoning: Arc<dyn ReasoningService> = providers.chat.clone();
    let search: Arc<dyn SearchProvider> = providers
        .search
        .clone()
        .context("Web search is not configured: set TAVILY_API_KEY")?;

    if providers.input_guards.is_empty() && config.guards.denylist.is_empty() {
        warn!("No guard backends configured; requests are not screened");
    }

    let mut worker = AgentResearchWorker::new(Arc::clone(&reasoning), search, &config.worker);
    if let Some(stage) = content_guard(&config, &providers.input_guards)? {
        worker = worker.with_content_guard(Arc::new(stage));
    }

    let mut builder = Orchestrator::builder(config.clone())
        .store(store)
        .classifier(Arc::new(ReasoningClassifier::new(Arc::clone(&reasoning))))
        .worker(Arc::new(worker));
    builder = match config.planner.kind {
        PlannerKind::Topic => builder.planner(Arc::new(TopicPlanner::new())),
        PlannerKind::Reasoning => builder.planner(Arc::new(ReasoningPlanner::new(
            reasoning,
            config.planner.max_sub_questions,
        ))),
    };
    for guard in providers.input_guards {
        builder = builder.input_guard(guard);
    }
    for guard in providers.output_guards {
        builder = builder.output_guard(guard);
    }

    info!(
        model = %provider_config.llm.model,
        planner = ?config.planner.kind,
        "Engine ready"
    );
    Ok(builder.build()?)
}

// ========== Workflow Commands ==========

async fn cmd_ask(
    engine: &Orchestrator,
    thread_id: &ThreadId,
    message: &str,
    json: bool,
) -> Result<Outcome> {
    let outcome = engine.submit(thread_id, message).await?;
    print_outcome(thread_id, &outcome, json)?;
    Ok(outcome)
}

async fn cmd_resume(engine: &Orchestrator, request: &ResumeRequest, json: bool) -> Result<Outcome> {
    let outcome = engine.resume(request).await?;
    print_outcome(&request.thread_id, &outcome, json)?;
    Ok(outcome)
}

async fn cmd_recover(engine: &Orchestrator, thread_id: &ThreadId, json: bool) -> Result<Outcome> {
    let outcome = engine.recover(thread_id).await?;
    print_outcome(thread_id, &outcome, json)?;
    Ok(outcome)
}

fn print_outcome(thread_id: &ThreadId, outcome: &Outcome, json: bool) -> Result<()> {
    if json {
        let doc = json!({"thread_id": thread_id, "outcome": outcome});
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{}", outcome.message());
    if let Outcome::Suspended { token_id, .. } = outcome {
        println!();
        println!(
            "To continue: research resume --thread {} approve --token {}",
            thread_id, token_id
        );
    }
    Ok(())
}

// ========== Inspection Commands ==========

async fn cmd_show(store: &dyn CheckpointStore, thread_id: &ThreadId, json: bool) -> Result<()> {
    let Some(record) = store.load(thread_id).await? else {
        println!("No workflow stored for thread {}", thread_id);
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record.state)?);
        return Ok(());
    }

    let state: WorkflowState =
        serde_json::from_value(record.state).context("Stored snapshot is not a workflow")?;
    println!("Thread:    {}", state.thread_id);
    println!("Request:   {} (#{})", state.request.text, state.request.seq);
    println!("Stage:     {}", state.stage);
    println!("Revision:  {}", record.revision);
    println!("Saved at:  {}", record.saved_at.to_rfc3339());
    if let Some(c) = &state.classification {
        println!("Category:  {}", c.category);
    }
    if !state.units.is_empty() {
        println!("Units:");
        for unit in &state.units {
            println!("  {} [{:?}] {}", unit.id, unit.status, unit.sub_question);
        }
    }
    if let Some(outcome) = &state.outcome {
        println!("Outcome:   {}", outcome.kind());
    }
    Ok(())
}

async fn cmd_threads(store: &dyn CheckpointStore, json: bool) -> Result<()> {
    let threads = store.list_threads().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&threads)?);
        return Ok(());
    }
    if threads.is_empty() {
        println!("No threads");
    }
    for thread in threads {
        println!("{}", thread);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepresearch_core::fakes::{ScriptedClassifier, ScriptedWorker};
    use deepresearch_core::{Category, Stage};
    use deepresearch_state::fakes::MemoryCheckpointStore;

    fn engine(category: Category, store: Arc<dyn CheckpointStore>) -> Orchestrator {
        Orchestrator::builder(EngineConfig::default())
            .store(store)
            .classifier(Arc::new(ScriptedClassifier::category(category)))
            .worker(Arc::new(ScriptedWorker::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_resume_args_parse() {
        let cli = Cli::try_parse_from([
            "research", "resume", "--thread", "t1", "approve", "--token", "abc",
        ])
        .unwrap();
        match cli.command {
            Commands::Resume {
                thread,
                decision,
                token,
            } => {
                assert_eq!(thread, "t1");
                assert_eq!(decision, Decision::Approve);
                assert_eq!(token.as_deref(), Some("abc"));
            }
            _ => panic!("expected resume"),
        }
    }

    #[test]
    fn test_unknown_decision_rejected() {
        assert!(Cli::try_parse_from(["research", "resume", "--thread", "t1", "maybe"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["research", "threads", "--json", "--db", "/tmp/x"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.db.as_deref(), Some("/tmp/x"));
    }

    #[tokio::test]
    async fn test_ask_then_resume_through_commands() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let engine = engine(Category::Multitopic, Arc::clone(&store));
        let thread = ThreadId::new("cli-multi");

        let outcome = cmd_ask(&engine, &thread, "rust vs go", false).await.unwrap();
        let Outcome::Suspended { token_id, .. } = &outcome else {
            panic!("expected suspension, got {outcome:?}");
        };

        let request =
            ResumeRequest::new(thread.clone(), Decision::Approve).with_token(token_id.clone());
        let outcome = cmd_resume(&engine, &request, true).await.unwrap();
        assert_eq!(outcome.kind(), "delivered");

        let state = engine.snapshot(&thread).await.unwrap().unwrap();
        assert_eq!(state.stage, Stage::Delivered);
        cmd_show(store.as_ref(), &thread, false).await.unwrap();
        cmd_threads(store.as_ref(), false).await.unwrap();
    }

    #[tokio::test]
    async fn test_recover_unknown_thread_fails() {
        let engine = engine(Category::Simple, Arc::new(MemoryCheckpointStore::new()));
        assert!(cmd_recover(&engine, &ThreadId::new("ghost"), false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_show_missing_thread_is_not_an_error() {
        let store = MemoryCheckpointStore::new();
        cmd_show(&store, &ThreadId::new("ghost"), false).await.unwrap();
    }
}
