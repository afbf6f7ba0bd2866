//! Scripted graph store for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{EpisodeReceipt, GraphConnector, GraphSession};
use crate::error::GraphError;
use crate::request::GraphCommitRequest;

#[derive(Default)]
struct Inner {
    connect_errors: Mutex<VecDeque<GraphError>>,
    submit_errors: Mutex<VecDeque<GraphError>>,
    committed: Mutex<Vec<GraphCommitRequest>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    submits: AtomicUsize,
}

/// Connector whose connects and submissions fail according to a script,
/// then succeed. Accepted requests are recorded.
#[derive(Clone, Default)]
pub struct MockGraphConnector {
    inner: Arc<Inner>,
}

impl MockGraphConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next connect with `error`. Stacks.
    pub fn connect_error(self, error: GraphError) -> Self {
        self.inner.connect_errors.lock().push_back(error);
        self
    }

    /// Fail the next `add_episode` with `error`. Stacks.
    pub fn submit_error(self, error: GraphError) -> Self {
        self.inner.submit_errors.lock().push_back(error);
        self
    }

    pub fn committed(&self) -> Vec<GraphCommitRequest> {
        self.inner.committed.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::Relaxed)
    }

    pub fn submit_count(&self) -> usize {
        self.inner.submits.load(Ordering::Relaxed)
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        let connects = self.inner.connects.load(Ordering::Relaxed);
        let closes = self.inner.closes.load(Ordering::Relaxed);
        connects.saturating_sub(closes)
    }
}

#[async_trait]
impl GraphConnector for MockGraphConnector {
    async fn connect(&self) -> Result<Box<dyn GraphSession>, GraphError> {
        if let Some(error) = self.inner.connect_errors.lock().pop_front() {
            return Err(error);
        }
        let _ = self.inner.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockGraphSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockGraphSession {
    inner: Arc<Inner>,
}

#[async_trait]
impl GraphSession for MockGraphSession {
    async fn add_episode(
        &mut self,
        request: &GraphCommitRequest,
    ) -> Result<EpisodeReceipt, GraphError> {
        let n = self.inner.submits.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(error) = self.inner.submit_errors.lock().pop_front() {
            return Err(error);
        }
        self.inner.committed.lock().push(request.clone());
        Ok(EpisodeReceipt {
            episode_uuid: Some(format!("mock-episode-{n}")),
        })
    }

    async fn close(self: Box<Self>) {
        let _ = self.inner.closes.fetch_add(1, Ordering::Relaxed);
    }
}
