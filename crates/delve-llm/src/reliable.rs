//! Retry and circuit breaking around the analyst's single-call provider.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use delve_core::errors::GatewayError;
use delve_core::provider::{Completion, CompletionRequest, LlmProvider};
use delve_core::retry;

#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    /// Consecutive failed calls that open the breaker.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<(BreakerState, u32)>,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            inner: Mutex::new((BreakerState::Closed, 0)),
        }
    }

    /// Refuse calls while open. After the cooldown one trial call is let through.
    fn admit(&self) -> Result<(), GatewayError> {
        let mut guard = self.inner.lock();
        match guard.0 {
            BreakerState::Open { since } if since.elapsed() < self.cooldown => {
                Err(GatewayError::ProviderOverloaded)
            }
            BreakerState::Open { .. } => {
                guard.0 = BreakerState::HalfOpen;
                Ok(())
            }
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
        }
    }

    fn on_success(&self) {
        let mut guard = self.inner.lock();
        if guard.0 != BreakerState::Closed {
            info!("analyst circuit closed");
        }
        *guard = (BreakerState::Closed, 0);
    }

    fn on_failure(&self) {
        let mut guard = self.inner.lock();
        guard.1 += 1;
        let failures = guard.1;
        if failures >= self.threshold && !matches!(guard.0, BreakerState::Open { .. }) {
            warn!(
                failures,
                cooldown_secs = self.cooldown.as_secs(),
                "analyst circuit opened"
            );
            guard.0 = BreakerState::Open {
                since: Instant::now(),
            };
        }
    }

    fn state_name(&self) -> &'static str {
        match self.inner.lock().0 {
            BreakerState::Closed => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Wraps an [`LlmProvider`]: retryable errors are retried with backoff
/// (a `retry_after` hint wins), and repeated failures trip a breaker.
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    breaker: CircuitBreaker,
    retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        let breaker =
            CircuitBreaker::new(config.circuit_breaker_threshold, config.circuit_breaker_cooldown);
        Self {
            inner,
            config,
            breaker,
            retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        suggested.unwrap_or_else(|| {
            retry::backoff_delay(
                attempt,
                self.config.base_delay,
                self.config.max_delay,
                self.config.jitter_factor,
            )
        })
    }

    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        self.breaker.state_name()
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let mut attempt = 0;
        loop {
            self.breaker.admit()?;
            let err = match self.inner.complete(request).await {
                Ok(completion) => {
                    self.breaker.on_success();
                    return Ok(completion);
                }
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= self.config.max_retries {
                self.breaker.on_failure();
                return Err(err);
            }

            let delay = self.retry_delay(attempt, err.suggested_delay());
            let _ = self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "analyst call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};
    use delve_core::batch::ModelParameters;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "analyst".into(),
            prompt: "synthesize".into(),
            params: ModelParameters {
                model: "mock-model".into(),
                max_tokens: 100,
                temperature: 0.3,
                web_search: false,
            },
        }
    }

    fn server_error(body: &str) -> MockResponse {
        MockResponse::Error(GatewayError::ServerError {
            status: 500,
            body: body.into(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_try() {
        let mock = MockProvider::new(vec![MockResponse::text("hello")]);
        let reliable = ReliableProvider::with_defaults(mock);

        let completion = reliable.complete(&request()).await.unwrap();
        assert_eq!(completion.text, "hello");
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_retryable_error() {
        let mock = MockProvider::new(vec![
            server_error("internal"),
            server_error("internal"),
            MockResponse::text("recovered"),
        ]);
        let config = ReliableConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..Default::default()
        };
        let reliable = ReliableProvider::new(mock, config);

        let completion = reliable.complete(&request()).await.unwrap();
        assert_eq!(completion.text, "recovered");
        assert_eq!(reliable.total_retries(), 2);
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_is_honored() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(GatewayError::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
            }),
            MockResponse::text("ok"),
        ]);
        let reliable = ReliableProvider::with_defaults(mock);

        let start = Instant::now();
        let _ = reliable.complete(&request()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_not_retried() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(GatewayError::AuthenticationFailed("bad key".into())),
            MockResponse::text("should not reach"),
        ]);
        let reliable = ReliableProvider::with_defaults(mock);

        let err = reliable.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationFailed(_)));
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn max_retries_exhausted() {
        let mock = MockProvider::new((0..4).map(|_| server_error("fail")).collect());
        let config = ReliableConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        };
        let reliable = ReliableProvider::new(mock, config);

        assert!(reliable.complete(&request()).await.is_err());
        assert_eq!(reliable.total_retries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_breaker_trips_and_recovers() {
        let mock = MockProvider::new(vec![
            server_error("1"),
            server_error("2"),
            server_error("3"),
            MockResponse::text("recovered"),
        ]);
        let config = ReliableConfig {
            max_retries: 0,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
            ..Default::default()
        };
        let reliable = ReliableProvider::new(mock, config);

        for _ in 0..3 {
            let _ = reliable.complete(&request()).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        let err = reliable.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderOverloaded));
        assert_eq!(reliable.inner().call_count(), 3);

        tokio::time::advance(Duration::from_secs(61)).await;

        let completion = reliable.complete(&request()).await.unwrap();
        assert_eq!(completion.text, "recovered");
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[test]
    fn suggested_delay_wins_over_backoff() {
        let reliable = ReliableProvider::with_defaults(MockProvider::new(vec![]));
        let hint = Duration::from_secs(42);
        assert_eq!(reliable.retry_delay(5, Some(hint)), hint);
        assert!(reliable.retry_delay(0, None) <= Duration::from_millis(1200));
    }

    #[test]
    fn provider_delegates_properties() {
        let reliable = ReliableProvider::with_defaults(MockProvider::new(vec![]));
        assert_eq!(reliable.name(), "mock");
        assert_eq!(reliable.model(), "mock-model");
    }
}
