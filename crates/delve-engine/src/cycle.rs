//! The research cycle state machine.
//!
//! ```text
//! Building -> WorkersRunning -> Synthesizing -> Persisting -> Committing -> Done
//!                  |                 |              |
//!                  +-----------------+--------------+----> Failed
//! ```
//!
//! Worker results are on disk before synthesis starts and the artifact is
//! on disk before the commit starts. A failed commit leaves the cycle `Done`
//! with the failure recorded in the report.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use delve_core::artifact::{CycleKind, ResearchArtifact, WorkerOutput};
use delve_core::batch::WorkerResult;
use delve_core::events::{CycleState, ResearchEvent};
use delve_core::ids::{CycleId, WorkerId};
use delve_core::messages::{format_transcript, Role};
use delve_core::session::{EpisodeName, Session};
use delve_graph::{CommitOutcome, GraphConnector, KnowledgeCommitAdapter};
use delve_settings::{DelveSettings, LlmSettings, ResearchSettings};
use delve_store::{ArtifactStore, SessionStore};

use crate::analyst::CriticalAnalyst;
use crate::distill::ConversationDistiller;
use crate::error::EngineError;
use crate::orchestrator::BatchOrchestrator;
use crate::prompts;

/// Inputs for one cycle.
#[derive(Clone, Debug)]
pub struct CycleParams {
    pub kind: CycleKind,
    /// Raw episode name; sanitized once when the cycle claims it.
    pub episode_name: String,
    pub query: String,
    pub context: String,
    /// User turn that started this cycle, appended to history before the
    /// cohort is built.
    pub trigger: Option<String>,
}

impl CycleParams {
    pub fn new(kind: CycleKind, episode_name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            kind,
            episode_name: episode_name.into(),
            query: query.into(),
            context: String::new(),
            trigger: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_trigger(mut self, turn: impl Into<String>) -> Self {
        self.trigger = Some(turn.into());
        self
    }
}

/// How the knowledge commit ended for a cycle that reached `Committing`.
#[derive(Clone, Debug, PartialEq)]
pub enum CommitReport {
    Committed(CommitOutcome),
    /// The commit failed; the artifact is still on disk and can be
    /// recommitted later.
    Degraded { error: String },
}

#[derive(Clone, Debug)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub episode_name: EpisodeName,
    /// Every state entered, in order. The last one is terminal.
    pub transitions: Vec<CycleState>,
    /// State that was running when the cycle failed.
    pub failed_stage: Option<CycleState>,
    pub error: Option<String>,
    pub worker_results: Vec<WorkerResult>,
    pub attempts_path: Option<PathBuf>,
    pub artifact_path: Option<PathBuf>,
    pub commit: Option<CommitReport>,
}

impl CycleReport {
    fn new(cycle_id: CycleId, episode_name: EpisodeName) -> Self {
        Self {
            cycle_id,
            episode_name,
            transitions: Vec::new(),
            failed_stage: None,
            error: None,
            worker_results: Vec::new(),
            attempts_path: None,
            artifact_path: None,
            commit: None,
        }
    }

    pub fn final_state(&self) -> CycleState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(CycleState::Building)
    }

    pub fn is_done(&self) -> bool {
        self.final_state() == CycleState::Done
    }

    pub fn succeeded_workers(&self) -> usize {
        self.worker_results.iter().filter(|r| r.is_success()).count()
    }
}

/// Runs research cycles against one batch provider, analyst and graph store.
pub struct ResearchCycle<C: GraphConnector> {
    orchestrator: BatchOrchestrator,
    analyst: CriticalAnalyst,
    committer: KnowledgeCommitAdapter<C>,
    distiller: Option<ConversationDistiller>,
    research: ResearchSettings,
    llm: LlmSettings,
    event_tx: broadcast::Sender<ResearchEvent>,
}

impl<C: GraphConnector> ResearchCycle<C> {
    pub fn new(
        orchestrator: BatchOrchestrator,
        analyst: CriticalAnalyst,
        committer: KnowledgeCommitAdapter<C>,
        settings: &DelveSettings,
        event_tx: broadcast::Sender<ResearchEvent>,
    ) -> Self {
        Self {
            orchestrator,
            analyst,
            committer,
            distiller: None,
            research: settings.research.clone(),
            llm: settings.llm.clone(),
            event_tx,
        }
    }

    /// Distill the conversation behind each cycle into the commit's research
    /// context. Without one the raw conversation is committed.
    pub fn with_distiller(mut self, distiller: ConversationDistiller) -> Self {
        self.distiller = Some(distiller);
        self
    }

    pub fn committer(&self) -> &KnowledgeCommitAdapter<C> {
        &self.committer
    }

    fn send_event(&self, event: ResearchEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }

    fn enter(&self, report: &mut CycleReport, state: CycleState) {
        info!(cycle_id = %report.cycle_id, state = state.as_str(), "cycle state");
        report.transitions.push(state);
        self.send_event(ResearchEvent::CycleStateChanged {
            cycle_id: report.cycle_id.clone(),
            state,
        });
    }

    fn fail(
        &self,
        session: &Session,
        mut report: CycleReport,
        stage: CycleState,
        err: EngineError,
    ) -> CycleReport {
        error!(cycle_id = %report.cycle_id, stage = stage.as_str(), error = %err, "cycle failed");
        report.failed_stage = Some(stage);
        report.error = Some(err.to_string());
        self.enter(&mut report, CycleState::Failed);
        save_session(session);
        report
    }

    /// Run one cycle to a terminal state.
    ///
    /// Stage failures end in a `Failed` report. An `Err` is returned only
    /// when the session refuses the episode name.
    #[instrument(skip_all, fields(kind = params.kind.as_str(), episode = %params.episode_name))]
    pub async fn run(
        &self,
        session: &mut Session,
        params: CycleParams,
    ) -> Result<CycleReport, EngineError> {
        let started_at = Utc::now();
        let _ = session.begin_cycle();
        let episode = session.set_episode_name(&params.episode_name)?.clone();
        let mut report = CycleReport::new(CycleId::new(), episode.clone());

        self.enter(&mut report, CycleState::Building);
        if let Some(turn) = &params.trigger {
            session.append_turn(Role::User, turn.clone());
        }
        let context = merge_context(&params.context, session.take_pending_refinement().as_deref());
        let cohort = prompts::build_cohort(
            self.research.profile,
            &self.llm,
            &params.query,
            &context,
            session.history(),
        );
        let labels: HashMap<WorkerId, String> = cohort
            .iter()
            .map(|r| (r.worker_id.clone(), r.label.clone()))
            .collect();
        let store = ArtifactStore::new(session.session_dir());

        self.enter(&mut report, CycleState::WorkersRunning);
        let mut job = match self.orchestrator.submit(cohort).await {
            Ok(job) => job,
            Err(e) => return Ok(self.fail(session, report, CycleState::WorkersRunning, e)),
        };
        let results = match self.orchestrator.await_completion(&mut job).await {
            Ok(results) => results,
            Err(e) => return Ok(self.fail(session, report, CycleState::WorkersRunning, e)),
        };
        report.worker_results = results;
        match store.persist_attempts(&episode, job.id(), &report.worker_results) {
            Ok(path) => report.attempts_path = Some(path),
            Err(e) => {
                return Ok(self.fail(session, report, CycleState::WorkersRunning, e.into()));
            }
        }

        let outputs: Vec<WorkerOutput> = report
            .worker_results
            .iter()
            .filter_map(|r| {
                r.output_text().map(|text| WorkerOutput {
                    worker_id: r.worker_id.clone(),
                    label: labels
                        .get(&r.worker_id)
                        .cloned()
                        .unwrap_or_else(|| r.worker_id.to_string()),
                    text: text.to_string(),
                })
            })
            .collect();
        for failed in report.worker_results.iter().filter(|r| !r.is_success()) {
            warn!(
                worker = %failed.worker_id,
                status = failed.status().as_str(),
                error = failed.error_detail().unwrap_or(""),
                "worker did not succeed"
            );
        }

        let required = self.research.min_successful_workers.max(1);
        if outputs.len() < required {
            let err = EngineError::Synthesis(format!(
                "{} of {} workers succeeded, {} required",
                outputs.len(),
                report.worker_results.len(),
                required
            ));
            return Ok(self.fail(session, report, CycleState::Synthesizing, err));
        }

        self.enter(&mut report, CycleState::Synthesizing);
        let synthesis_text = match self.analyst.synthesize(&params.query, &context, &outputs).await {
            Ok(text) => text,
            Err(e) => return Ok(self.fail(session, report, CycleState::Synthesizing, e)),
        };
        let distilled_context = self.distill(session).await;

        self.enter(&mut report, CycleState::Persisting);
        let artifact = ResearchArtifact {
            cycle_id: report.cycle_id.clone(),
            episode_name: episode.clone(),
            topic: session.topic().to_string(),
            kind: params.kind,
            batch_id: job.id().clone(),
            worker_outputs: outputs,
            synthesis_text,
            context: audit_context(&context, session),
            distilled_context,
            started_at,
            completed_at: Utc::now(),
        };
        let artifact_path = match store.persist(&artifact) {
            Ok(path) => path,
            Err(e) => return Ok(self.fail(session, report, CycleState::Persisting, e.into())),
        };
        self.send_event(ResearchEvent::ArtifactPersisted {
            path: artifact_path.display().to_string(),
        });
        report.artifact_path = Some(artifact_path.clone());

        self.enter(&mut report, CycleState::Committing);
        let request = self.committer.build_commit_request(&artifact, &episode);
        report.commit = Some(
            match self.committer.submit(&request, Some(&artifact_path)).await {
                Ok(outcome) => CommitReport::Committed(outcome),
                Err(e) => {
                    warn!(error = %e, path = %artifact_path.display(), "knowledge commit failed, artifact kept for recommit");
                    CommitReport::Degraded {
                        error: e.to_string(),
                    }
                }
            },
        );

        self.enter(&mut report, CycleState::Done);
        session.mark_cycle_complete();
        save_session(session);
        Ok(report)
    }

    /// Distilled form of the turns since the last finished cycle. A failed
    /// distillation falls back to committing the raw conversation.
    async fn distill(&self, session: &Session) -> String {
        let Some(distiller) = &self.distiller else {
            return String::new();
        };
        match distiller.distill(session.turns_since_last_cycle()).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "conversation distillation failed, committing raw conversation");
                String::new()
            }
        }
    }
}

/// Rebuild the commit request from a persisted artifact and submit it again.
/// The request matches the one built when the artifact was first written.
#[instrument(skip(committer))]
pub async fn recommit<C: GraphConnector>(
    committer: &KnowledgeCommitAdapter<C>,
    artifact_path: &Path,
) -> Result<CommitOutcome, EngineError> {
    let artifact = ArtifactStore::load_artifact(artifact_path)?;
    let request = committer.build_commit_request(&artifact, &artifact.episode_name);
    Ok(committer.submit(&request, Some(artifact_path)).await?)
}

fn merge_context(context: &str, refinement: Option<&str>) -> String {
    match refinement.map(str::trim).filter(|r| !r.is_empty()) {
        Some(refinement) if context.trim().is_empty() => format!("Refinement: {refinement}"),
        Some(refinement) => format!("{}\n\nRefinement: {refinement}", context.trim()),
        None => context.trim().to_string(),
    }
}

/// Context stored with the artifact: the tasking context followed by the
/// full conversation.
fn audit_context(context: &str, session: &Session) -> String {
    let mut out = context.to_string();
    if !session.history().is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str("CONVERSATION\n");
        out.push_str(&format_transcript(session.history()));
    }
    out
}

fn save_session(session: &Session) {
    if let Err(e) = SessionStore::save(session) {
        warn!(error = %e, "failed to save session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refinement_is_appended_to_context() {
        assert_eq!(merge_context("", None), "");
        assert_eq!(merge_context(" B2B ", None), "B2B");
        assert_eq!(merge_context("", Some("pricing")), "Refinement: pricing");
        assert_eq!(
            merge_context("B2B", Some("pricing")),
            "B2B\n\nRefinement: pricing"
        );
        assert_eq!(merge_context("B2B", Some("   ")), "B2B");
    }

    #[test]
    fn audit_context_includes_conversation() {
        let mut session = Session::new("/tmp/unused", "topic");
        assert_eq!(audit_context("ctx", &session), "ctx");
        session.append_turn(Role::User, "dig into vendors");
        let audit = audit_context("ctx", &session);
        assert!(audit.starts_with("ctx\n\nCONVERSATION\n"));
        assert!(audit.contains("USER: dig into vendors"));
    }

    #[test]
    fn report_final_state_defaults_to_building() {
        let report = CycleReport::new(CycleId::new(), EpisodeName::new("x").unwrap());
        assert_eq!(report.final_state(), CycleState::Building);
        assert!(!report.is_done());
    }
}
