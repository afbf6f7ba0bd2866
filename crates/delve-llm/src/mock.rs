//! Scripted providers for deterministic tests without API calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use delve_core::batch::{
    BatchState, BatchStatus, RequestCounts, WorkerRequest, WorkerResult, WorkerStatus,
};
use delve_core::errors::GatewayError;
use delve_core::ids::{BatchId, WorkerId};
use delve_core::provider::{
    BatchProvider, Completion, CompletionRequest, LlmProvider, TokenUsage,
};

/// Pre-programmed responses for [`MockProvider`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    Text(String),
    Error(GatewayError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Single-call provider that returns responses in sequence and records
/// every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(mut current) = self.responses.lock().pop_front() else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        loop {
            match current {
                MockResponse::Text(text) => {
                    return Ok(Completion {
                        text,
                        stop_reason: Some("end_turn".into()),
                        usage: TokenUsage::default(),
                    })
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

/// Scripted behavior of one batch item.
#[derive(Clone, Debug)]
pub struct MockItem {
    outcome: MockOutcome,
    /// Number of polls after which the item becomes terminal. `None` never finishes.
    after_polls: Option<u32>,
}

#[derive(Clone, Debug)]
enum MockOutcome {
    Succeeds(String),
    Fails(String),
    Expires,
    Cancels,
}

impl MockItem {
    pub fn succeeds(text: impl Into<String>) -> Self {
        Self {
            outcome: MockOutcome::Succeeds(text.into()),
            after_polls: Some(0),
        }
    }

    pub fn fails(error: impl Into<String>) -> Self {
        Self {
            outcome: MockOutcome::Fails(error.into()),
            after_polls: Some(0),
        }
    }

    pub fn expires() -> Self {
        Self {
            outcome: MockOutcome::Expires,
            after_polls: Some(0),
        }
    }

    pub fn cancels() -> Self {
        Self {
            outcome: MockOutcome::Cancels,
            after_polls: Some(0),
        }
    }

    /// An item that stays pending no matter how often it is polled.
    pub fn never_finishes() -> Self {
        Self {
            outcome: MockOutcome::Expires,
            after_polls: None,
        }
    }

    pub fn after_polls(mut self, polls: u32) -> Self {
        self.after_polls = Some(polls);
        self
    }

    fn is_done(&self, ticks: u32) -> bool {
        self.after_polls.is_some_and(|n| ticks >= n)
    }

    fn result(&self, worker_id: &WorkerId) -> WorkerResult {
        let id = worker_id.clone();
        match &self.outcome {
            MockOutcome::Succeeds(text) => WorkerResult::succeeded(id, text.clone()),
            MockOutcome::Fails(error) => WorkerResult::failed(id, error.clone()),
            MockOutcome::Expires => WorkerResult::expired(id, "request expired before processing"),
            MockOutcome::Cancels => WorkerResult::canceled(id, "request canceled by provider"),
        }
    }
}

struct MockJob {
    items: Vec<(WorkerId, MockItem)>,
    ticks: u32,
}

impl MockJob {
    /// Terminal items in completion order: earlier `after_polls` first, ties
    /// resolved in reverse submission order.
    fn completed(&self) -> Vec<WorkerResult> {
        let mut done: Vec<(u32, usize, &WorkerId, &MockItem)> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, (_, item))| item.is_done(self.ticks))
            .map(|(idx, (id, item))| (item.after_polls.unwrap_or(u32::MAX), idx, id, item))
            .collect();
        done.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        done.into_iter().map(|(_, _, id, item)| item.result(id)).collect()
    }

    fn status(&self, batch_id: &BatchId) -> BatchStatus {
        let mut counts = RequestCounts::default();
        for result in self.completed() {
            match result.status() {
                WorkerStatus::Succeeded => counts.succeeded += 1,
                WorkerStatus::Failed => counts.errored += 1,
                WorkerStatus::Expired => counts.expired += 1,
                WorkerStatus::Canceled => counts.canceled += 1,
                WorkerStatus::Pending => {}
            }
        }
        counts.processing = self.items.len() as u32 - counts.terminal();
        let state = if counts.processing == 0 {
            BatchState::Ended
        } else {
            BatchState::InProgress
        };
        BatchStatus {
            batch_id: batch_id.clone(),
            state,
            counts,
        }
    }
}

/// Batch provider whose items finish after a scripted number of polls.
///
/// Workers without a scripted item succeed on the first poll with the text
/// `"<worker_id> findings"`.
#[derive(Default)]
pub struct MockBatchProvider {
    scripts: HashMap<WorkerId, MockItem>,
    submit_errors: Mutex<VecDeque<GatewayError>>,
    poll_errors: Mutex<VecDeque<GatewayError>>,
    jobs: DashMap<String, MockJob>,
    submitted: Mutex<Vec<Vec<WorkerRequest>>>,
    poll_count: AtomicUsize,
    fetch_count: AtomicUsize,
}

impl MockBatchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(mut self, worker_id: impl Into<String>, item: MockItem) -> Self {
        let _ = self.scripts.insert(WorkerId::new(worker_id), item);
        self
    }

    /// Fail the next submit with `error`. Stacks.
    pub fn submit_error(self, error: GatewayError) -> Self {
        self.submit_errors.lock().push_back(error);
        self
    }

    /// Fail the next poll with `error` without advancing the job. Stacks.
    pub fn poll_error(self, error: GatewayError) -> Self {
        self.poll_errors.lock().push_back(error);
        self
    }

    pub fn submitted(&self) -> Vec<Vec<WorkerRequest>> {
        self.submitted.lock().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::Relaxed)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }

    fn script_for(&self, worker_id: &WorkerId) -> MockItem {
        self.scripts
            .get(worker_id)
            .cloned()
            .unwrap_or_else(|| MockItem::succeeds(format!("{worker_id} findings")).after_polls(1))
    }
}

#[async_trait]
impl BatchProvider for MockBatchProvider {
    fn name(&self) -> &str {
        "mock-batches"
    }

    async fn submit(&self, requests: &[WorkerRequest]) -> Result<BatchId, GatewayError> {
        if let Some(error) = self.submit_errors.lock().pop_front() {
            return Err(error);
        }
        let items = requests
            .iter()
            .map(|r| (r.worker_id.clone(), self.script_for(&r.worker_id)))
            .collect();
        let mut submitted = self.submitted.lock();
        submitted.push(requests.to_vec());
        let batch_id = BatchId::from_raw(format!("mockbatch_{}", submitted.len()));
        let _ = self
            .jobs
            .insert(batch_id.as_str().to_string(), MockJob { items, ticks: 0 });
        Ok(batch_id)
    }

    async fn poll(&self, batch_id: &BatchId) -> Result<BatchStatus, GatewayError> {
        let _ = self.poll_count.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.poll_errors.lock().pop_front() {
            return Err(error);
        }
        let mut job = self
            .jobs
            .get_mut(batch_id.as_str())
            .ok_or_else(|| GatewayError::NotFound(batch_id.to_string()))?;
        job.ticks += 1;
        Ok(job.status(batch_id))
    }

    async fn fetch(&self, batch_id: &BatchId) -> Result<Vec<WorkerResult>, GatewayError> {
        let _ = self.fetch_count.fetch_add(1, Ordering::Relaxed);
        let job = self
            .jobs
            .get(batch_id.as_str())
            .ok_or_else(|| GatewayError::NotFound(batch_id.to_string()))?;
        Ok(job.completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::batch::ModelParameters;

    fn req(id: &str) -> WorkerRequest {
        WorkerRequest {
            worker_id: WorkerId::new(id),
            label: id.to_uppercase(),
            system_prompt: "system".into(),
            prompt_text: "prompt".into(),
            params: ModelParameters {
                model: "mock-model".into(),
                max_tokens: 10,
                temperature: 0.0,
                web_search: false,
            },
        }
    }

    fn completion_request() -> CompletionRequest {
        CompletionRequest {
            system: "s".into(),
            prompt: "p".into(),
            params: req("x").params,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mock_provider_sequences_and_records() {
        let mock = MockProvider::new(vec![
            MockResponse::delayed(Duration::from_secs(1), MockResponse::text("first")),
            MockResponse::Error(GatewayError::ProviderOverloaded),
        ]);
        let first = mock.complete(&completion_request()).await.unwrap();
        assert_eq!(first.text, "first");
        assert!(mock.complete(&completion_request()).await.is_err());
        let exhausted = mock.complete(&completion_request()).await.unwrap_err();
        assert!(matches!(exhausted, GatewayError::InvalidRequest(_)));
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn batch_items_finish_after_scripted_polls() {
        let mock = MockBatchProvider::new()
            .item("a", MockItem::succeeds("alpha").after_polls(2))
            .item("b", MockItem::fails("boom").after_polls(1));
        let id = mock.submit(&[req("a"), req("b")]).await.unwrap();

        let first = mock.poll(&id).await.unwrap();
        assert_eq!(first.state, BatchState::InProgress);
        assert_eq!(first.counts.errored, 1);
        assert_eq!(first.counts.processing, 1);

        let partial = mock.fetch(&id).await.unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].worker_id.as_str(), "b");

        let second = mock.poll(&id).await.unwrap();
        assert!(second.is_ended());
        assert_eq!(second.counts.succeeded, 1);
    }

    #[tokio::test]
    async fn fetch_is_completion_ordered() {
        let mock = MockBatchProvider::new()
            .item("a", MockItem::succeeds("1").after_polls(0))
            .item("b", MockItem::succeeds("2").after_polls(0));
        let id = mock.submit(&[req("a"), req("b")]).await.unwrap();
        let results = mock.fetch(&id).await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn scripted_errors_are_consumed_once() {
        let mock = MockBatchProvider::new()
            .submit_error(GatewayError::ProviderOverloaded)
            .poll_error(GatewayError::NetworkError("reset".into()));
        assert!(mock.submit(&[req("a")]).await.is_err());
        let id = mock.submit(&[req("a")]).await.unwrap();
        assert!(mock.poll(&id).await.is_err());
        assert!(mock.poll(&id).await.unwrap().is_ended());
        assert_eq!(mock.submit_count(), 1);
        assert_eq!(mock.poll_count(), 2);
    }

    #[tokio::test]
    async fn never_finishing_item_stays_pending() {
        let mock = MockBatchProvider::new().item("slow", MockItem::never_finishes());
        let id = mock.submit(&[req("slow")]).await.unwrap();
        for _ in 0..5 {
            assert_eq!(mock.poll(&id).await.unwrap().counts.processing, 1);
        }
        assert!(mock.fetch(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_batch_is_not_found() {
        let mock = MockBatchProvider::new();
        let err = mock.poll(&BatchId::from_raw("nope")).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }
}
