use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, CycleId, WorkerId};
use crate::session::EpisodeName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Initial,
    Deep,
}

impl CycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Deep => "deep",
        }
    }
}

/// Text produced by one successful worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub worker_id: WorkerId,
    pub label: String,
    pub text: String,
}

/// Everything one research cycle produced. Worker outputs are in cohort
/// submission order; failed workers are omitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchArtifact {
    pub cycle_id: CycleId,
    pub episode_name: EpisodeName,
    pub topic: String,
    pub kind: CycleKind,
    pub batch_id: BatchId,
    pub worker_outputs: Vec<WorkerOutput>,
    pub synthesis_text: String,
    /// Tasking context followed by the full conversation (audit trail).
    #[serde(default)]
    pub context: String,
    /// What the conversation established, condensed for the graph. Empty
    /// when nothing was distilled.
    #[serde(default)]
    pub distilled_context: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_json_roundtrip_keeps_order() {
        let artifact = ResearchArtifact {
            cycle_id: CycleId::new(),
            episode_name: EpisodeName::new("Graph memory").unwrap(),
            topic: "Graph memory".into(),
            kind: CycleKind::Initial,
            batch_id: BatchId::from_raw("msgbatch_1"),
            worker_outputs: vec![
                WorkerOutput {
                    worker_id: WorkerId::new("academic_researcher"),
                    label: "Academic Research".into(),
                    text: "a".into(),
                },
                WorkerOutput {
                    worker_id: WorkerId::new("tool_analyzer"),
                    label: "Tool Analysis".into(),
                    text: "c".into(),
                },
            ],
            synthesis_text: "summary".into(),
            context: String::new(),
            distilled_context: String::new(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&artifact).unwrap();
        assert!(json.contains("\"episodeName\": \"Graph_memory\""));
        let back: ResearchArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, artifact);
    }
}
