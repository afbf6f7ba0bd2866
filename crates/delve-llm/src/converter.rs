//! Conversion between delve types and the Anthropic Messages / Message
//! Batches wire format.

use serde::Deserialize;
use serde_json::{json, Value};

use delve_core::batch::{BatchState, ModelParameters, RequestCounts, WorkerRequest, WorkerResult};
use delve_core::errors::GatewayError;
use delve_core::ids::WorkerId;
use delve_core::provider::{Completion, TokenUsage};

use crate::models;

pub const WEB_SEARCH_TOOL: &str = "web_search_20250305";

/// Build the `params` object of a Messages request.
pub fn build_message_params(system: &str, prompt: &str, params: &ModelParameters) -> Value {
    let mut body = json!({
        "model": params.model,
        "max_tokens": models::clamp_max_tokens(&params.model, params.max_tokens),
        "temperature": params.temperature,
        "system": system,
        "messages": [{ "role": "user", "content": prompt }],
    });
    if params.web_search {
        body["tools"] = json!([{ "type": WEB_SEARCH_TOOL, "name": "web_search" }]);
    }
    body
}

/// Build the body of `POST /v1/messages/batches`. Worker ids become `custom_id`s.
pub fn build_batch_body(requests: &[WorkerRequest]) -> Value {
    let items: Vec<Value> = requests
        .iter()
        .map(|r| {
            json!({
                "custom_id": r.worker_id.as_str(),
                "params": build_message_params(&r.system_prompt, &r.prompt_text, &r.params),
            })
        })
        .collect();
    json!({ "requests": items })
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<WireUsage>,
}

impl MessageResponse {
    /// Concatenate every text block; tool-use and search-result blocks are skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect()
    }

    pub fn into_completion(self) -> Completion {
        let text = self.text();
        let usage = self
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();
        Completion {
            text,
            stop_reason: self.stop_reason,
            usage,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireCounts {
    #[serde(default)]
    pub processing: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub errored: u32,
    #[serde(default)]
    pub canceled: u32,
    #[serde(default)]
    pub expired: u32,
}

/// A Message Batch object as returned by create and retrieve.
#[derive(Debug, Deserialize)]
pub struct BatchObject {
    pub id: String,
    pub processing_status: String,
    pub request_counts: WireCounts,
    pub results_url: Option<String>,
}

impl BatchObject {
    pub fn state(&self) -> Result<BatchState, GatewayError> {
        match self.processing_status.as_str() {
            "in_progress" => Ok(BatchState::InProgress),
            "canceling" => Ok(BatchState::Canceling),
            "ended" => Ok(BatchState::Ended),
            other => Err(GatewayError::InvalidResponse(format!(
                "unknown processing_status: {other}"
            ))),
        }
    }

    pub fn counts(&self) -> RequestCounts {
        let c = &self.request_counts;
        RequestCounts {
            processing: c.processing,
            succeeded: c.succeeded,
            errored: c.errored,
            canceled: c.canceled,
            expired: c.expired,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultLine {
    custom_id: String,
    result: ResultBody,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResultBody {
    Succeeded { message: MessageResponse },
    Errored { error: Value },
    Canceled,
    Expired,
}

/// Parse the JSONL results file of an ended batch.
pub fn parse_results_jsonl(body: &str) -> Result<Vec<WorkerResult>, GatewayError> {
    let mut results = Vec::new();
    for (n, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: ResultLine = serde_json::from_str(line).map_err(|e| {
            GatewayError::InvalidResponse(format!("results line {}: {e}", n + 1))
        })?;
        let worker_id = WorkerId::new(parsed.custom_id);
        let result = match parsed.result {
            ResultBody::Succeeded { message } => WorkerResult::succeeded(worker_id, message.text()),
            ResultBody::Errored { error } => WorkerResult::failed(worker_id, error_message(&error)),
            ResultBody::Canceled => WorkerResult::canceled(worker_id, "request canceled by provider"),
            ResultBody::Expired => {
                WorkerResult::expired(worker_id, "request expired before processing")
            }
        };
        results.push(result);
    }
    Ok(results)
}

/// Pull the human-readable message out of a nested provider error object.
fn error_message(error: &Value) -> String {
    let nested = error
        .get("error")
        .and_then(|e| e.get("message"))
        .or_else(|| error.get("message"))
        .and_then(Value::as_str);
    match nested {
        Some(msg) => msg.to_string(),
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::batch::WorkerStatus;

    fn params(web_search: bool) -> ModelParameters {
        ModelParameters {
            model: "claude-haiku-4-5-20251001".into(),
            max_tokens: 500,
            temperature: 0.3,
            web_search,
        }
    }

    #[test]
    fn message_params_shape() {
        let body = build_message_params("be terse", "topic: graphs", &params(false));
        assert_eq!(body["model"], "claude-haiku-4-5-20251001");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "topic: graphs");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn web_search_tool_attached() {
        let body = build_message_params("s", "p", &params(true));
        assert_eq!(body["tools"][0]["type"], WEB_SEARCH_TOOL);
    }

    #[test]
    fn batch_body_uses_worker_ids() {
        let requests = vec![
            WorkerRequest {
                worker_id: WorkerId::new("academic_researcher"),
                label: "Academic Research".into(),
                system_prompt: "s1".into(),
                prompt_text: "p".into(),
                params: params(false),
            },
            WorkerRequest {
                worker_id: WorkerId::new("tool_analyzer"),
                label: "Tool Analysis".into(),
                system_prompt: "s2".into(),
                prompt_text: "p".into(),
                params: params(false),
            },
        ];
        let body = build_batch_body(&requests);
        let items = body["requests"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["custom_id"], "academic_researcher");
        assert_eq!(items[1]["params"]["system"], "s2");
    }

    #[test]
    fn message_text_skips_non_text_blocks() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "Part one. "},
                {"type": "server_tool_use", "id": "x", "name": "web_search", "input": {}},
                {"type": "web_search_tool_result", "tool_use_id": "x", "content": []},
                {"type": "text", "text": "Part two."}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 4}
        }"#;
        let msg: MessageResponse = serde_json::from_str(raw).unwrap();
        let completion = msg.into_completion();
        assert_eq!(completion.text, "Part one. Part two.");
        assert_eq!(completion.usage.output_tokens, 4);
        assert_eq!(completion.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn batch_object_state_and_counts() {
        let raw = r#"{
            "id": "msgbatch_01",
            "type": "message_batch",
            "processing_status": "in_progress",
            "request_counts": {"processing": 2, "succeeded": 1, "errored": 0, "canceled": 0, "expired": 0},
            "results_url": null
        }"#;
        let batch: BatchObject = serde_json::from_str(raw).unwrap();
        assert_eq!(batch.state().unwrap(), BatchState::InProgress);
        assert_eq!(batch.counts().processing, 2);
        assert_eq!(batch.counts().succeeded, 1);
    }

    #[test]
    fn unknown_processing_status_is_invalid_response() {
        let batch = BatchObject {
            id: "b".into(),
            processing_status: "paused".into(),
            request_counts: WireCounts {
                processing: 0,
                succeeded: 0,
                errored: 0,
                canceled: 0,
                expired: 0,
            },
            results_url: None,
        };
        assert!(matches!(batch.state(), Err(GatewayError::InvalidResponse(_))));
    }

    #[test]
    fn results_jsonl_classifies_each_line() {
        let body = concat!(
            r#"{"custom_id":"academic_researcher","result":{"type":"succeeded","message":{"content":[{"type":"text","text":"findings"}]}}}"#,
            "\n",
            r#"{"custom_id":"industry_intelligence","result":{"type":"errored","error":{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}}}"#,
            "\n\n",
            r#"{"custom_id":"tool_analyzer","result":{"type":"expired"}}"#,
            "\n",
        );
        let results = parse_results_jsonl(body).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].output_text(), Some("findings"));
        assert_eq!(results[1].status(), WorkerStatus::Failed);
        assert_eq!(results[1].error_detail(), Some("Overloaded"));
        assert_eq!(results[2].status(), WorkerStatus::Expired);
    }

    #[test]
    fn malformed_results_line_reports_line_number() {
        let err = parse_results_jsonl("{\"custom_id\":\"a\"}\n").unwrap_err();
        assert!(err.to_string().contains("line 1"), "got: {err}");
    }
}
