//! Batch lifecycle: submit a cohort, poll until it ends or the wait budget
//! runs out, then collect one result per worker in submission order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use delve_core::batch::{RequestCounts, WorkerRequest, WorkerResult, WorkerStatus};
use delve_core::errors::GatewayError;
use delve_core::events::ResearchEvent;
use delve_core::ids::{BatchId, WorkerId};
use delve_core::provider::BatchProvider;

use crate::error::EngineError;

/// Attempts at downloading results once the provider reports the batch ended.
const FETCH_ATTEMPTS: u32 = 3;

/// A submitted cohort and everything observed about it so far.
#[derive(Debug)]
pub struct BatchJob {
    id: BatchId,
    requests: Vec<WorkerRequest>,
    submitted_at: Instant,
    last_counts: RequestCounts,
    results: HashMap<WorkerId, WorkerResult>,
    complete: bool,
}

impl BatchJob {
    fn new(id: BatchId, requests: Vec<WorkerRequest>) -> Self {
        Self {
            id,
            requests,
            submitted_at: Instant::now(),
            last_counts: RequestCounts::default(),
            results: HashMap::new(),
            complete: false,
        }
    }

    pub fn id(&self) -> &BatchId {
        &self.id
    }

    pub fn requests(&self) -> &[WorkerRequest] {
        &self.requests
    }

    pub fn last_counts(&self) -> RequestCounts {
        self.last_counts
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Status of one worker. Unknown and unfinished workers are pending.
    pub fn status_of(&self, worker_id: &WorkerId) -> WorkerStatus {
        self.results
            .get(worker_id)
            .map(WorkerResult::status)
            .unwrap_or(WorkerStatus::Pending)
    }

    /// Record terminal results. The first terminal result for a worker wins;
    /// results for workers outside the cohort are dropped.
    fn absorb(&mut self, results: Vec<WorkerResult>) {
        for result in results {
            if !self.requests.iter().any(|r| r.worker_id == result.worker_id) {
                warn!(batch_id = %self.id, worker = %result.worker_id, "result for unknown worker ignored");
                continue;
            }
            if !result.status().is_terminal() {
                continue;
            }
            let _ = self.results.entry(result.worker_id.clone()).or_insert(result);
        }
    }

    /// Close out every worker still without a result.
    fn settle_missing(&mut self, make: impl Fn(WorkerId) -> WorkerResult) -> usize {
        let mut settled = 0;
        for request in &self.requests {
            if !self.results.contains_key(&request.worker_id) {
                let _ = self
                    .results
                    .insert(request.worker_id.clone(), make(request.worker_id.clone()));
                settled += 1;
            }
        }
        settled
    }

    /// Results in submission order.
    fn ordered_results(&self) -> Vec<WorkerResult> {
        self.requests
            .iter()
            .filter_map(|r| self.results.get(&r.worker_id).cloned())
            .collect()
    }
}

pub struct BatchOrchestrator {
    provider: Arc<dyn BatchProvider>,
    poll_interval: Duration,
    max_wait: Duration,
    event_tx: broadcast::Sender<ResearchEvent>,
}

impl BatchOrchestrator {
    pub fn new(
        provider: Arc<dyn BatchProvider>,
        poll_interval: Duration,
        max_wait: Duration,
        event_tx: broadcast::Sender<ResearchEvent>,
    ) -> Self {
        Self {
            provider,
            poll_interval,
            max_wait,
            event_tx,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn send_event(&self, event: ResearchEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }

    /// Submit the whole cohort as one batch.
    #[instrument(skip_all, fields(workers = requests.len()))]
    pub async fn submit(&self, requests: Vec<WorkerRequest>) -> Result<BatchJob, EngineError> {
        if requests.is_empty() {
            return Err(EngineError::Submission(GatewayError::InvalidRequest(
                "cohort is empty".into(),
            )));
        }
        let mut seen = HashSet::new();
        for request in &requests {
            if !seen.insert(request.worker_id.as_str()) {
                return Err(EngineError::Submission(GatewayError::InvalidRequest(
                    format!("duplicate worker id: {}", request.worker_id),
                )));
            }
        }

        let batch_id = self
            .provider
            .submit(&requests)
            .await
            .map_err(EngineError::Submission)?;
        info!(batch_id = %batch_id, provider = self.provider.name(), "batch submitted");
        self.send_event(ResearchEvent::BatchSubmitted {
            batch_id: batch_id.clone(),
            workers: requests.len(),
        });
        Ok(BatchJob::new(batch_id, requests))
    }

    /// Poll until the batch ends or the wait budget is spent, then return one
    /// result per submitted worker in submission order.
    ///
    /// Transient poll failures are reported and polling continues. On timeout,
    /// whatever already finished is kept and the rest is marked expired.
    #[instrument(skip_all, fields(batch_id = %job.id))]
    pub async fn await_completion(&self, job: &mut BatchJob) -> Result<Vec<WorkerResult>, EngineError> {
        if job.complete {
            return Ok(job.ordered_results());
        }

        let ended = loop {
            match self.provider.poll(&job.id).await {
                Ok(status) => {
                    job.last_counts = status.counts;
                    self.send_event(ResearchEvent::BatchProgress {
                        batch_id: job.id.clone(),
                        elapsed_secs: job.elapsed().as_secs(),
                        counts: status.counts,
                    });
                    if status.is_ended() {
                        break true;
                    }
                    debug!(
                        processing = status.counts.processing,
                        terminal = status.counts.terminal(),
                        "batch still running"
                    );
                }
                Err(e) if e.is_fatal() => {
                    warn!(error = %e, "batch poll failed permanently");
                    return Err(EngineError::Gateway(e));
                }
                Err(e) => {
                    warn!(error = %e, "batch poll failed, will retry");
                    self.send_event(ResearchEvent::BatchPollFailed {
                        batch_id: job.id.clone(),
                        error: e.to_string(),
                    });
                }
            }

            let elapsed = job.elapsed();
            if elapsed >= self.max_wait {
                break false;
            }
            tokio::time::sleep(self.poll_interval.min(self.max_wait - elapsed)).await;
        };

        if ended {
            let results = self.fetch_with_retry(&job.id).await?;
            job.absorb(results);
            let missing = job.settle_missing(|id| {
                WorkerResult::failed(id, "batch ended without a result for this worker")
            });
            if missing > 0 {
                warn!(missing, "provider returned fewer results than submitted");
            }
        } else {
            match self.provider.fetch(&job.id).await {
                Ok(partial) => job.absorb(partial),
                Err(e) => warn!(error = %e, "could not fetch partial results after timeout"),
            }
            let wait = self.max_wait;
            let expired = job.settle_missing(|id| {
                WorkerResult::expired(id, format!("not finished within {}s", wait.as_secs()))
            });
            warn!(expired, max_wait_secs = wait.as_secs(), "batch wait budget exhausted");
            self.send_event(ResearchEvent::BatchTimedOut {
                batch_id: job.id.clone(),
                expired,
            });
        }

        job.complete = true;
        let results = job.ordered_results();
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(succeeded, failed = results.len() - succeeded, "workers finished");
        self.send_event(ResearchEvent::WorkersFinished {
            batch_id: job.id.clone(),
            succeeded,
            failed: results.len() - succeeded,
        });
        Ok(results)
    }

    /// Results of a completed job, in submission order. Calling this any
    /// number of times returns the same results without touching the
    /// provider.
    pub fn extract_results(&self, job: &BatchJob) -> Result<Vec<WorkerResult>, EngineError> {
        if !job.complete {
            return Err(EngineError::JobNotComplete(job.id.to_string()));
        }
        Ok(job.ordered_results())
    }

    async fn fetch_with_retry(&self, batch_id: &BatchId) -> Result<Vec<WorkerResult>, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.fetch(batch_id).await {
                Ok(results) => return Ok(results),
                Err(e) if e.is_retryable() && attempt < FETCH_ATTEMPTS => {
                    let delay = e.suggested_delay().unwrap_or(self.poll_interval);
                    warn!(attempt, error = %e, "result download failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(EngineError::Gateway(e)),
            }
        }
    }
}
