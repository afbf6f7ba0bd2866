use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::instrument;

use delve_core::errors::GatewayError;
use delve_core::provider::{Completion, CompletionRequest, LlmProvider};
use delve_core::security::ApiKey;

use crate::converter::{self, MessageResponse};
use crate::models::{self, ClaudeModelInfo};

pub(crate) const API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Authenticated HTTP access to the Anthropic API, shared by the
/// single-call and batch providers.
#[derive(Clone, Debug)]
pub(crate) struct ApiClient {
    client: Client,
    api_key: ApiKey,
    base_url: String,
}

impl ApiClient {
    pub(crate) fn new(api_key: ApiKey) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            base_url: API_BASE.to_string(),
        })
    }

    pub(crate) fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("x-api-key", self.api_key.expose())
            .header("anthropic-version", API_VERSION)
            .header("accept", "application/json")
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.post(url))
            .header("content-type", "application/json")
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    /// Send the request and turn transport failures and non-2xx statuses
    /// into classified gateway errors.
    pub(crate) async fn send(&self, req: RequestBuilder) -> Result<Response, GatewayError> {
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(REQUEST_TIMEOUT)
            } else {
                GatewayError::NetworkError(e.to_string())
            }
        })?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let retry_after = parse_retry_after(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        Err(match GatewayError::from_status(status, body) {
            GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
            other => other,
        })
    }

    pub(crate) async fn json<T: serde::de::DeserializeOwned>(
        resp: Response,
    ) -> Result<T, GatewayError> {
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Single-call Messages API provider. Used for the critical analyst pass.
pub struct AnthropicProvider {
    api: ApiClient,
    model_info: &'static ClaudeModelInfo,
}

impl AnthropicProvider {
    pub fn new(api_key: ApiKey, model_name: Option<&str>) -> Result<Self, GatewayError> {
        let model_info = model_name
            .and_then(models::find_model)
            .unwrap_or_else(models::default_model);
        Ok(Self {
            api: ApiClient::new(api_key)?,
            model_info,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.set_base_url(base_url);
        self
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        self.model_info.name
    }

    #[instrument(skip(self, request), fields(model = %request.params.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let body =
            converter::build_message_params(&request.system, &request.prompt, &request.params);
        let url = self.api.url("/v1/messages");
        let resp = self.api.send(self.api.post(&url).json(&body)).await?;
        let message: MessageResponse = ApiClient::json(resp).await?;
        Ok(message.into_completion())
    }
}
