//! Worker requests, per-worker outcomes and batch status reported by a
//! batch provider.

use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, WorkerId};

/// Generation parameters shared by every worker in a cohort.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Attach the provider's server-side web search tool.
    pub web_search: bool,
}

/// One generation request within a cohort. Immutable once submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub worker_id: WorkerId,
    pub label: String,
    pub system_prompt: String,
    pub prompt_text: String,
    pub params: ModelParameters,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Succeeded,
    Failed,
    Expired,
    Canceled,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
        }
    }
}

/// Terminal outcome of one worker. Output exists only on success; every
/// other outcome carries an error detail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Succeeded { output: String },
    Failed { error: String },
    Expired { error: String },
    Canceled { error: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_id: WorkerId,
    #[serde(flatten)]
    pub outcome: WorkerOutcome,
}

impl WorkerResult {
    pub fn succeeded(worker_id: WorkerId, output: impl Into<String>) -> Self {
        Self {
            worker_id,
            outcome: WorkerOutcome::Succeeded {
                output: output.into(),
            },
        }
    }

    pub fn failed(worker_id: WorkerId, error: impl Into<String>) -> Self {
        Self {
            worker_id,
            outcome: WorkerOutcome::Failed { error: error.into() },
        }
    }

    pub fn expired(worker_id: WorkerId, error: impl Into<String>) -> Self {
        Self {
            worker_id,
            outcome: WorkerOutcome::Expired { error: error.into() },
        }
    }

    pub fn canceled(worker_id: WorkerId, error: impl Into<String>) -> Self {
        Self {
            worker_id,
            outcome: WorkerOutcome::Canceled { error: error.into() },
        }
    }

    pub fn status(&self) -> WorkerStatus {
        match self.outcome {
            WorkerOutcome::Succeeded { .. } => WorkerStatus::Succeeded,
            WorkerOutcome::Failed { .. } => WorkerStatus::Failed,
            WorkerOutcome::Expired { .. } => WorkerStatus::Expired,
            WorkerOutcome::Canceled { .. } => WorkerStatus::Canceled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, WorkerOutcome::Succeeded { .. })
    }

    pub fn output_text(&self) -> Option<&str> {
        match &self.outcome {
            WorkerOutcome::Succeeded { output } => Some(output),
            _ => None,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.outcome {
            WorkerOutcome::Succeeded { .. } => None,
            WorkerOutcome::Failed { error }
            | WorkerOutcome::Expired { error }
            | WorkerOutcome::Canceled { error } => Some(error),
        }
    }
}

/// Provider-side processing state of the whole batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    InProgress,
    Canceling,
    Ended,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    pub processing: u32,
    pub succeeded: u32,
    pub errored: u32,
    pub canceled: u32,
    pub expired: u32,
}

impl RequestCounts {
    pub fn failed(&self) -> u32 {
        self.errored + self.canceled + self.expired
    }

    pub fn terminal(&self) -> u32 {
        self.succeeded + self.failed()
    }

    pub fn total(&self) -> u32 {
        self.processing + self.terminal()
    }
}

/// One poll response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_id: BatchId,
    pub state: BatchState,
    pub counts: RequestCounts,
}

impl BatchStatus {
    pub fn is_ended(&self) -> bool {
        self.state == BatchState::Ended
    }
}
