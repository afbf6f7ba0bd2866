use async_trait::async_trait;
use tracing::{debug, info, instrument};

use delve_core::batch::{BatchStatus, WorkerRequest, WorkerResult};
use delve_core::errors::GatewayError;
use delve_core::ids::BatchId;
use delve_core::provider::BatchProvider;
use delve_core::security::ApiKey;

use crate::anthropic::ApiClient;
use crate::converter::{self, BatchObject};

const BATCHES_PATH: &str = "/v1/messages/batches";

/// Message Batches API provider. Every worker request in a cohort becomes
/// one batch item keyed by its worker id.
pub struct AnthropicBatchProvider {
    api: ApiClient,
}

impl AnthropicBatchProvider {
    pub fn new(api_key: ApiKey) -> Result<Self, GatewayError> {
        Ok(Self {
            api: ApiClient::new(api_key)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.set_base_url(base_url);
        self
    }

    async fn retrieve(&self, batch_id: &BatchId) -> Result<BatchObject, GatewayError> {
        let url = self.api.url(&format!("{BATCHES_PATH}/{batch_id}"));
        let resp = self.api.send(self.api.get(&url)).await?;
        ApiClient::json(resp).await
    }
}

#[async_trait]
impl BatchProvider for AnthropicBatchProvider {
    fn name(&self) -> &str {
        "anthropic-batches"
    }

    #[instrument(skip_all, fields(workers = requests.len()))]
    async fn submit(&self, requests: &[WorkerRequest]) -> Result<BatchId, GatewayError> {
        let body = converter::build_batch_body(requests);
        let url = self.api.url(BATCHES_PATH);
        let resp = self.api.send(self.api.post(&url).json(&body)).await?;
        let batch: BatchObject = ApiClient::json(resp).await?;
        info!(batch_id = %batch.id, "batch created");
        Ok(BatchId::from_raw(batch.id))
    }

    #[instrument(skip(self), fields(batch_id = %batch_id))]
    async fn poll(&self, batch_id: &BatchId) -> Result<BatchStatus, GatewayError> {
        let batch = self.retrieve(batch_id).await?;
        let status = BatchStatus {
            batch_id: batch_id.clone(),
            state: batch.state()?,
            counts: batch.counts(),
        };
        debug!(state = ?status.state, counts = ?status.counts, "batch polled");
        Ok(status)
    }

    /// Results are only published once the batch has ended; before that the
    /// batch object carries no results URL and nothing is terminal yet.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    async fn fetch(&self, batch_id: &BatchId) -> Result<Vec<WorkerResult>, GatewayError> {
        let batch = self.retrieve(batch_id).await?;
        let Some(results_url) = batch.results_url else {
            return Ok(Vec::new());
        };
        let resp = self.api.send(self.api.get(&results_url)).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;
        let results = converter::parse_results_jsonl(&body)?;
        debug!(count = results.len(), "batch results fetched");
        Ok(results)
    }
}
