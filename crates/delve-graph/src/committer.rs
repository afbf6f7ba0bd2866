//! Knowledge Commit Adapter: builds the episode request for a research
//! artifact and submits it with reconnect, bounded retry and a ledger.

use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use delve_core::artifact::ResearchArtifact;
use delve_core::events::ResearchEvent;
use delve_core::retry;
use delve_core::session::EpisodeName;
use delve_settings::GraphSettings;
use delve_store::{CommitLedger, CommitStatus};

use crate::client::{EpisodeReceipt, GraphConnector};
use crate::error::{CommitError, GraphError};
use crate::request::{self, GraphCommitRequest};

#[derive(Clone, Debug)]
pub struct CommitPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.2,
        }
    }
}

impl From<&GraphSettings> for CommitPolicy {
    fn from(settings: &GraphSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { attempts: u32, receipt: EpisodeReceipt },
    /// The ledger shows this exact request was committed before; nothing was sent.
    AlreadyCommitted,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. } | Self::AlreadyCommitted)
    }
}

pub struct KnowledgeCommitAdapter<C: GraphConnector> {
    connector: C,
    group_id: String,
    policy: CommitPolicy,
    ledger: Option<CommitLedger>,
    events: Option<broadcast::Sender<ResearchEvent>>,
}

impl<C: GraphConnector> KnowledgeCommitAdapter<C> {
    pub fn new(connector: C, group_id: impl Into<String>, policy: CommitPolicy) -> Self {
        Self {
            connector,
            group_id: group_id.into(),
            policy,
            ledger: None,
            events: None,
        }
    }

    pub fn with_ledger(mut self, ledger: CommitLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<ResearchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn build_commit_request(
        &self,
        artifact: &ResearchArtifact,
        episode: &EpisodeName,
    ) -> GraphCommitRequest {
        request::build_commit_request(artifact, episode, &self.group_id)
    }

    /// Submit `request`, reconnecting and retrying transient failures.
    ///
    /// The request is sent unchanged on every attempt. With a ledger, the
    /// request is recorded before the first attempt and a key that is already
    /// committed is not sent again.
    #[instrument(skip_all, fields(episode = %request.episode_name))]
    pub async fn submit(
        &self,
        request: &GraphCommitRequest,
        artifact_path: Option<&Path>,
    ) -> Result<CommitOutcome, CommitError> {
        let key = request.idempotency_key();

        if let Some(ledger) = &self.ledger {
            let path = artifact_path.map(|p| p.display().to_string());
            let entry = ledger.record_pending(
                &key,
                &request.episode_name,
                &request.group_id,
                path.as_deref(),
            )?;
            if entry.status == CommitStatus::Committed {
                info!(key = %key, "episode already committed, skipping");
                return Ok(CommitOutcome::AlreadyCommitted);
            }
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.emit(ResearchEvent::CommitAttempt {
                episode: request.episode_name.clone(),
                attempt,
            });

            let error = match self.attempt(request).await {
                Ok(receipt) => {
                    info!(attempt, uuid = ?receipt.episode_uuid, "episode committed");
                    self.ledger_update(|l| l.mark_committed(&key, attempt));
                    return Ok(CommitOutcome::Committed {
                        attempts: attempt,
                        receipt,
                    });
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                warn!(attempt, error = %error, "graph store rejected episode");
                let message = error.to_string();
                self.ledger_update(|l| l.mark_failed(&key, attempt, &message));
                return Err(CommitError::Rejected(error));
            }

            if attempt >= max_attempts {
                warn!(attempt, error = %error, "graph commit retries exhausted");
                let message = error.to_string();
                self.ledger_update(|l| l.mark_failed(&key, attempt, &message));
                return Err(CommitError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = error
                .suggested_delay()
                .map(|hint| hint.min(self.policy.max_delay))
                .unwrap_or_else(|| {
                    retry::backoff_delay(
                        attempt - 1,
                        self.policy.base_delay,
                        self.policy.max_delay,
                        self.policy.jitter_factor,
                    )
                });
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "graph commit failed, reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One scoped connection: connect, submit, close on every path.
    async fn attempt(&self, request: &GraphCommitRequest) -> Result<EpisodeReceipt, GraphError> {
        let mut session = self.connector.connect().await?;
        let result = session.add_episode(request).await;
        session.close().await;
        result
    }

    /// Ledger bookkeeping after a send. A ledger failure here cannot undo
    /// what the store already did, so it is logged rather than returned.
    fn ledger_update(
        &self,
        update: impl FnOnce(&CommitLedger) -> Result<(), delve_store::StoreError>,
    ) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = update(ledger) {
                warn!(error = %e, "failed to update commit ledger");
            }
        }
    }

    fn emit(&self, event: ResearchEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("no event subscribers");
            }
        }
    }
}
