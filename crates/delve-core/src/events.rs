use serde::{Deserialize, Serialize};

use crate::batch::RequestCounts;
use crate::ids::{BatchId, CycleId};

/// States of the research cycle state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Building,
    WorkersRunning,
    Synthesizing,
    Persisting,
    Committing,
    Done,
    Failed,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::WorkersRunning => "workers_running",
            Self::Synthesizing => "synthesizing",
            Self::Persisting => "persisting",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Progress notifications. Emitted for UIs and logs; nothing in the engine
/// waits on them being consumed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    CycleStateChanged {
        cycle_id: CycleId,
        state: CycleState,
    },
    BatchSubmitted {
        batch_id: BatchId,
        workers: usize,
    },
    BatchProgress {
        batch_id: BatchId,
        elapsed_secs: u64,
        counts: RequestCounts,
    },
    BatchPollFailed {
        batch_id: BatchId,
        error: String,
    },
    BatchTimedOut {
        batch_id: BatchId,
        expired: usize,
    },
    WorkersFinished {
        batch_id: BatchId,
        succeeded: usize,
        failed: usize,
    },
    ArtifactPersisted {
        path: String,
    },
    CommitAttempt {
        episode: String,
        attempt: u32,
    },
}
