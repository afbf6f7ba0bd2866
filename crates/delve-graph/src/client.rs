//! Graph store connection seam.
//!
//! A [`GraphConnector`] opens a [`GraphSession`]; the committer opens one
//! session per attempt and closes it on every exit path.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::GraphError;
use crate::request::GraphCommitRequest;

/// Acknowledgement of an accepted episode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpisodeReceipt {
    pub episode_uuid: Option<String>,
}

#[async_trait]
pub trait GraphConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn GraphSession>, GraphError>;
}

#[async_trait]
pub trait GraphSession: Send {
    async fn add_episode(
        &mut self,
        request: &GraphCommitRequest,
    ) -> Result<EpisodeReceipt, GraphError>;

    async fn close(self: Box<Self>);
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector for a graph service exposing `GET /healthcheck` and
/// `POST /episodes`.
#[derive(Clone, Debug)]
pub struct HttpGraphConnector {
    base_url: String,
    request_timeout: Duration,
}

impl HttpGraphConnector {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GraphConnector for HttpGraphConnector {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn connect(&self) -> Result<Box<dyn GraphSession>, GraphError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| GraphError::Connection(format!("failed to build HTTP client: {e}")))?;

        let resp = client
            .get(format!("{}/healthcheck", self.base_url))
            .send()
            .await
            .map_err(|e| transport_error(e, self.request_timeout))?;
        if !resp.status().is_success() {
            return Err(GraphError::Connection(format!(
                "healthcheck returned {}",
                resp.status()
            )));
        }
        debug!("graph store reachable");

        Ok(Box::new(HttpGraphSession {
            client,
            base_url: self.base_url.clone(),
            timeout: self.request_timeout,
        }))
    }
}

struct HttpGraphSession {
    client: Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct EpisodeResponse {
    #[serde(default)]
    uuid: Option<String>,
}

#[async_trait]
impl GraphSession for HttpGraphSession {
    async fn add_episode(
        &mut self,
        request: &GraphCommitRequest,
    ) -> Result<EpisodeReceipt, GraphError> {
        let entity_types: Vec<_> = request
            .entity_type_hints
            .iter()
            .map(|h| json!({ "name": h.as_str(), "description": h.description() }))
            .collect();
        let edge_type_map: Vec<_> = request
            .edge_rules
            .iter()
            .map(|r| {
                json!({
                    "source": r.source.as_str(),
                    "target": r.target.as_str(),
                    "edges": r.verbs.iter().map(|v| v.label()).collect::<Vec<_>>(),
                })
            })
            .collect();
        let body = json!({
            "name": request.episode_name,
            "episode_body": request.body_text,
            "entity_types": entity_types,
            "edge_type_map": edge_type_map,
            "source_description": request.source_description,
            "reference_time": request.reference_time.to_rfc3339(),
            "group_id": request.group_id,
        });

        let resp = self
            .client
            .post(format!("{}/episodes", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = resp.status();
        if status.is_success() {
            let parsed: EpisodeResponse = resp
                .json()
                .await
                .map_err(|e| GraphError::InvalidResponse(e.to_string()))?;
            return Ok(EpisodeReceipt {
                episode_uuid: parsed.uuid,
            });
        }

        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = resp.text().await.unwrap_or_default();
        Err(classify_status(status, retry_after, text))
    }

    async fn close(self: Box<Self>) {}
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> GraphError {
    if e.is_timeout() {
        GraphError::Timeout(timeout)
    } else {
        GraphError::Connection(e.to_string())
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> GraphError {
    match status.as_u16() {
        429 => GraphError::RateLimited { retry_after },
        408 | 502 | 503 | 504 => GraphError::Connection(format!("{status}: {body}")),
        s if s >= 500 => GraphError::Connection(format!("{status}: {body}")),
        _ => GraphError::Rejected(format!("{status}: {body}")),
    }
}
