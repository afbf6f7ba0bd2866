use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchStatus, ModelParameters, WorkerRequest, WorkerResult};
use crate::errors::GatewayError;
use crate::ids::BatchId;

/// A single request/response generation call.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub params: ModelParameters,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub text: String,
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

/// Trait implemented by single-call LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError>;
}

/// Trait implemented by asynchronous batch providers.
///
/// `poll` and `fetch` must be side-effect free: calling them twice observes
/// the same job without changing it. `fetch` returns results for every item
/// that has reached a terminal state so far.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, requests: &[WorkerRequest]) -> Result<BatchId, GatewayError>;
    async fn poll(&self, batch_id: &BatchId) -> Result<BatchStatus, GatewayError>;
    async fn fetch(&self, batch_id: &BatchId) -> Result<Vec<WorkerResult>, GatewayError>;
}
