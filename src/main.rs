//! # delve
//!
//! Runs batch research cycles and commits the results to a knowledge graph.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, Level};

use delve_core::artifact::CycleKind;
use delve_core::events::ResearchEvent;
use delve_core::provider::LlmProvider;
use delve_core::security::ApiKey;
use delve_core::session::{sanitize_for_filesystem, Session};
use delve_engine::{
    recommit, BatchOrchestrator, CommitReport, ConversationDistiller, CriticalAnalyst,
    CycleParams, CycleReport, EpisodeNamer, ResearchCycle,
};
use delve_graph::{CommitOutcome, CommitPolicy, HttpGraphConnector, KnowledgeCommitAdapter};
use delve_llm::{AnthropicBatchProvider, AnthropicProvider, ReliableProvider};
use delve_settings::{DelveSettings, ResearchProfile};
use delve_store::{CommitLedger, Database, SessionStore, StoreError};
use delve_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "delve", about = "Batch research cycles committed to a knowledge graph")]
struct Cli {
    /// Settings file (defaults to ~/.delve/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// One JSON object per log line.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Debug logging for delve crates.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an initial cycle on a topic, then one deep cycle per refinement.
    Research {
        topic: String,

        /// Episode name of the initial cycle. Without it the analyst model
        /// suggests one; a resumed session keeps its first episode's name.
        #[arg(long)]
        episode: Option<String>,

        /// Tasking context given to every worker.
        #[arg(long, default_value = "")]
        context: String,

        /// Refinement request. Repeatable; each runs one deep cycle.
        #[arg(long = "refine")]
        refinements: Vec<String>,

        /// Session directory. Resumed when it already holds a session.
        #[arg(long)]
        session_dir: Option<PathBuf>,

        /// Short prompts, small model, no web search.
        #[arg(long)]
        quick: bool,
    },
    /// Commit a persisted artifact again.
    Recommit { artifact: PathBuf },
    /// List commits the graph store has not confirmed.
    Pending,
    /// Print the effective settings.
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig {
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        ..TelemetryConfig::default()
    };
    if cli.verbose {
        for module in ["delve_engine", "delve_graph", "delve_llm", "delve_store"] {
            telemetry.module_levels.push((module.to_string(), Level::DEBUG));
        }
    }
    let _guard = init_telemetry(telemetry);

    let settings = match &cli.settings {
        Some(path) => delve_settings::load_settings_from_path(path),
        None => delve_settings::load_settings(),
    }
    .context("failed to load settings")?;

    match cli.command {
        Command::Research {
            topic,
            episode,
            context,
            refinements,
            session_dir,
            quick,
        } => {
            let mut settings = settings;
            if quick {
                settings.research.profile = ResearchProfile::Quick;
            }
            research(
                settings,
                ResearchArgs {
                    topic,
                    episode,
                    context,
                    refinements,
                    session_dir,
                },
            )
            .await
        }
        Command::Recommit { artifact } => {
            let committer = build_committer(&settings)?;
            let outcome = recommit(&committer, &artifact)
                .await
                .with_context(|| format!("recommit of {} failed", artifact.display()))?;
            match outcome {
                CommitOutcome::Committed { attempts, receipt } => println!(
                    "committed after {attempts} attempt(s){}",
                    receipt
                        .episode_uuid
                        .map(|u| format!(", episode {u}"))
                        .unwrap_or_default()
                ),
                CommitOutcome::AlreadyCommitted => println!("already committed, nothing sent"),
            }
            Ok(())
        }
        Command::Pending => {
            let ledger = open_ledger(&settings)?;
            let pending = ledger.pending()?;
            if pending.is_empty() {
                println!("no pending commits");
            }
            for entry in pending {
                println!(
                    "{}  {:<8} attempts={}  {}  {}",
                    &entry.idempotency_key[..12.min(entry.idempotency_key.len())],
                    entry.status,
                    entry.attempts,
                    entry.episode_name,
                    entry.artifact_path.as_deref().unwrap_or("-"),
                );
                if let Some(error) = entry.last_error {
                    println!("    last error: {error}");
                }
            }
            Ok(())
        }
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

struct ResearchArgs {
    topic: String,
    episode: Option<String>,
    context: String,
    refinements: Vec<String>,
    session_dir: Option<PathBuf>,
}

async fn research(settings: DelveSettings, args: ResearchArgs) -> Result<()> {
    let key_env = settings.llm.api_key_env.clone();
    let api_key =
        ApiKey::from_env(&key_env).with_context(|| format!("{key_env} is not set"))?;

    let (event_tx, event_rx) = broadcast::channel(256);
    let progress = tokio::spawn(print_progress(event_rx));

    let batches = AnthropicBatchProvider::new(api_key.clone())?;
    let analyst_llm: Arc<dyn LlmProvider> = Arc::new(ReliableProvider::with_defaults(
        AnthropicProvider::new(api_key, Some(settings.llm.analyst_model.as_str()))?,
    ));
    let orchestrator = BatchOrchestrator::new(
        Arc::new(batches),
        settings.research.poll_interval(),
        settings.research.max_wait(),
        event_tx.clone(),
    );
    let analyst = CriticalAnalyst::from_settings(analyst_llm.clone(), &settings.llm);
    let distiller = ConversationDistiller::from_settings(analyst_llm.clone(), &settings.llm);
    let namer = EpisodeNamer::from_settings(analyst_llm, &settings.llm);
    let committer = build_committer(&settings)?.with_events(event_tx.clone());
    let cycle = ResearchCycle::new(orchestrator, analyst, committer, &settings, event_tx)
        .with_distiller(distiller);

    let session_dir = args.session_dir.unwrap_or_else(|| {
        PathBuf::from(&settings.output.sessions_dir).join(format!(
            "{}_{}",
            sanitize_for_filesystem(&args.topic),
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });
    let mut session = open_session(&session_dir, &args.topic)?;
    info!(dir = %session_dir.display(), session_id = %session.id(), "session ready");

    let base = namer
        .resolve(args.episode.as_deref(), &session, &args.topic)
        .await
        .context("failed to name the episode; pass --episode")?;
    if args.episode.is_none() && session.cycle_count() == 0 {
        println!("episode: {base} (override with --episode)");
    }
    if session.cycle_count() == 0 {
        let params = CycleParams::new(CycleKind::Initial, &base, &args.topic)
            .with_context(&args.context)
            .with_trigger(&args.topic);
        let report = cycle.run(&mut session, params).await?;
        print_report(&report);
        if !report.is_done() {
            bail!("initial cycle failed");
        }
    } else if args.refinements.is_empty() {
        bail!("session already has an initial cycle; pass --refine to go deeper");
    }

    for refinement in args.refinements {
        session.capture_refinement(&refinement);
        let episode = format!("{base}_deep_{}", session.cycle_count());
        let params = CycleParams::new(CycleKind::Deep, episode, session.topic().to_string())
            .with_context(&args.context)
            .with_trigger(refinement);
        let report = cycle.run(&mut session, params).await?;
        print_report(&report);
        if !report.is_done() {
            bail!("deep cycle failed");
        }
    }

    drop(cycle);
    let _ = progress.await;
    Ok(())
}

fn open_session(dir: &Path, topic: &str) -> Result<Session> {
    match SessionStore::load(dir) {
        Ok(session) => {
            info!(cycles = session.cycle_count(), "resuming session");
            Ok(session)
        }
        Err(StoreError::NotFound(_)) => Ok(Session::new(dir, topic)),
        Err(e) => Err(e).with_context(|| format!("failed to load session in {}", dir.display())),
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_ledger(settings: &DelveSettings) -> Result<CommitLedger> {
    let path = PathBuf::from(&settings.output.ledger_path);
    ensure_parent_dir(&path)?;
    let db = Database::open(&path)
        .with_context(|| format!("failed to open commit ledger at {}", path.display()))?;
    Ok(CommitLedger::new(db))
}

fn build_committer(settings: &DelveSettings) -> Result<KnowledgeCommitAdapter<HttpGraphConnector>> {
    let connector = HttpGraphConnector::new(
        &settings.graph.base_url,
        Duration::from_secs(settings.graph.request_timeout_secs),
    );
    Ok(KnowledgeCommitAdapter::new(
        connector,
        &settings.research.group_id,
        CommitPolicy::from(&settings.graph),
    )
    .with_ledger(open_ledger(settings)?))
}

async fn print_progress(mut rx: broadcast::Receiver<ResearchEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        match event {
            ResearchEvent::CycleStateChanged { state, .. } => println!("[cycle] {}", state.as_str()),
            ResearchEvent::BatchSubmitted { batch_id, workers } => {
                println!("[batch] {batch_id} submitted with {workers} workers")
            }
            ResearchEvent::BatchProgress {
                elapsed_secs,
                counts,
                ..
            } => println!(
                "[batch] {elapsed_secs}s: {} processing, {} succeeded, {} failed",
                counts.processing,
                counts.succeeded,
                counts.failed()
            ),
            ResearchEvent::BatchPollFailed { error, .. } => println!("[batch] poll failed: {error}"),
            ResearchEvent::BatchTimedOut { expired, .. } => {
                println!("[batch] wait budget spent, {expired} worker(s) expired")
            }
            ResearchEvent::WorkersFinished {
                succeeded, failed, ..
            } => println!("[batch] done: {succeeded} succeeded, {failed} failed"),
            ResearchEvent::ArtifactPersisted { path } => println!("[store] {path}"),
            ResearchEvent::CommitAttempt { episode, attempt } => {
                println!("[graph] committing {episode}, attempt {attempt}")
            }
        }
    }
}

fn print_report(report: &CycleReport) {
    println!(
        "episode {}: {} ({}/{} workers succeeded)",
        report.episode_name,
        report.final_state().as_str(),
        report.succeeded_workers(),
        report.worker_results.len()
    );
    if let (Some(stage), Some(error)) = (report.failed_stage, &report.error) {
        println!("  failed during {}: {error}", stage.as_str());
    }
    if let Some(path) = &report.artifact_path {
        println!("  artifact: {}", path.display());
    }
    match &report.commit {
        Some(CommitReport::Committed(CommitOutcome::Committed { attempts, .. })) => {
            println!("  committed after {attempts} attempt(s)")
        }
        Some(CommitReport::Committed(CommitOutcome::AlreadyCommitted)) => {
            println!("  already committed")
        }
        Some(CommitReport::Degraded { error }) => {
            println!("  commit failed: {error}");
            println!("  retry with: delve recommit <artifact>");
        }
        None => {}
    }
}
