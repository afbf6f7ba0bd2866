//! Filesystem persistence of research cycle outputs.
//!
//! Layout under the session directory, one folder per episode:
//!
//! ```text
//! <session_dir>/<episode>/<episode>.json
//! <session_dir>/<episode>/<worker_id>.txt
//! <session_dir>/<episode>/critical_analysis.txt
//! <session_dir>/<episode>/refinement_context.txt
//! <session_dir>/<episode>/refinement_distilled.txt
//! <session_dir>/<episode>/attempts/worker_attempts.json
//! ```
//!
//! The attempts record sits in its own folder: an episode can be named
//! anything, so no file beside `<episode>.json` may end in `.json`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use delve_core::artifact::ResearchArtifact;
use delve_core::batch::WorkerResult;
use delve_core::ids::BatchId;
use delve_core::session::EpisodeName;

use crate::error::StoreError;

pub const SYNTHESIS_FILE: &str = "critical_analysis.txt";
pub const CONTEXT_FILE: &str = "refinement_context.txt";
pub const DISTILLED_FILE: &str = "refinement_distilled.txt";
pub const ATTEMPTS_DIR: &str = "attempts";
pub const ATTEMPTS_FILE: &str = "worker_attempts.json";

#[derive(Serialize)]
struct AttemptsFile<'a> {
    episode_name: &'a EpisodeName,
    batch_id: &'a BatchId,
    recorded_at: DateTime<Utc>,
    results: &'a [WorkerResult],
}

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn episode_dir(&self, episode: &EpisodeName) -> PathBuf {
        self.root.join(episode.as_str())
    }

    pub fn artifact_path(&self, episode: &EpisodeName) -> PathBuf {
        self.episode_dir(episode)
            .join(format!("{}.json", episode.as_str()))
    }

    /// Write every file of a finished cycle. The JSON artifact goes last so
    /// its presence implies the text files are complete. Returns its path.
    #[instrument(skip_all, fields(episode = %artifact.episode_name))]
    pub fn persist(&self, artifact: &ResearchArtifact) -> Result<PathBuf, StoreError> {
        let dir = self.episode_dir(&artifact.episode_name);
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        for output in &artifact.worker_outputs {
            let body = format!(
                "Worker: {}\nLabel: {}\nTimestamp: {}\nBatch ID: {}\n{}\n\n{}\n",
                output.worker_id,
                output.label,
                artifact.completed_at.to_rfc3339(),
                artifact.batch_id,
                "=".repeat(60),
                output.text,
            );
            write_file(&dir.join(format!("{}.txt", output.worker_id)), body.as_bytes())?;
        }

        write_file(&dir.join(SYNTHESIS_FILE), artifact.synthesis_text.as_bytes())?;
        if !artifact.context.is_empty() {
            write_file(&dir.join(CONTEXT_FILE), artifact.context.as_bytes())?;
        }
        if !artifact.distilled_context.is_empty() {
            write_file(&dir.join(DISTILLED_FILE), artifact.distilled_context.as_bytes())?;
        }

        let path = self.artifact_path(&artifact.episode_name);
        let json = serde_json::to_vec_pretty(artifact)?;
        write_file(&path, &json)?;

        info!(path = %path.display(), workers = artifact.worker_outputs.len(), "artifact persisted");
        Ok(path)
    }

    /// Record every worker's terminal status, including failures, so a cycle
    /// that stops before synthesis still leaves what it got on disk.
    pub fn persist_attempts(
        &self,
        episode: &EpisodeName,
        batch_id: &BatchId,
        results: &[WorkerResult],
    ) -> Result<PathBuf, StoreError> {
        let dir = self.episode_dir(episode).join(ATTEMPTS_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let file = AttemptsFile {
            episode_name: episode,
            batch_id,
            recorded_at: Utc::now(),
            results,
        };
        let path = dir.join(ATTEMPTS_FILE);
        write_file(&path, &serde_json::to_vec_pretty(&file)?)?;
        debug!(path = %path.display(), "worker attempts persisted");
        Ok(path)
    }

    pub fn load_artifact(path: &Path) -> Result<ResearchArtifact, StoreError> {
        let bytes = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::artifact::{CycleKind, WorkerOutput};
    use delve_core::ids::{CycleId, WorkerId};

    fn artifact(name: &str) -> ResearchArtifact {
        ResearchArtifact {
            cycle_id: CycleId::new(),
            episode_name: EpisodeName::new(name).unwrap(),
            topic: "agent memory".into(),
            kind: CycleKind::Initial,
            batch_id: BatchId::from_raw("msgbatch_1"),
            worker_outputs: vec![
                WorkerOutput {
                    worker_id: WorkerId::new("academic_researcher"),
                    label: "Academic Research".into(),
                    text: "papers".into(),
                },
                WorkerOutput {
                    worker_id: WorkerId::new("tool_analyzer"),
                    label: "Tool Analysis".into(),
                    text: "tools".into(),
                },
            ],
            synthesis_text: "synthesis".into(),
            context: "USER: focus on graphs".into(),
            distilled_context: "Graph databases are the focus.".into(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn persist_writes_all_files_under_episode_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = artifact("Agent memory systems");

        let path = store.persist(&a).unwrap();
        let episode_dir = dir.path().join("Agent_memory_systems");
        assert_eq!(path, episode_dir.join("Agent_memory_systems.json"));

        let worker = std::fs::read_to_string(episode_dir.join("academic_researcher.txt")).unwrap();
        assert!(worker.starts_with("Worker: academic_researcher\n"));
        assert!(worker.contains("Batch ID: msgbatch_1"));
        assert!(worker.trim_end().ends_with("papers"));
        assert!(episode_dir.join("tool_analyzer.txt").exists());
        assert_eq!(
            std::fs::read_to_string(episode_dir.join(SYNTHESIS_FILE)).unwrap(),
            "synthesis"
        );
        assert!(episode_dir.join(CONTEXT_FILE).exists());
        assert_eq!(
            std::fs::read_to_string(episode_dir.join(DISTILLED_FILE)).unwrap(),
            "Graph databases are the focus."
        );
    }

    #[test]
    fn nothing_distilled_writes_no_distilled_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut a = artifact("quiet episode");
        a.distilled_context.clear();
        let _ = store.persist(&a).unwrap();
        assert!(!dir.path().join("quiet_episode").join(DISTILLED_FILE).exists());
    }

    #[test]
    fn episode_named_like_attempts_file_keeps_both() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = artifact("worker_attempts");
        let results = vec![WorkerResult::failed(WorkerId::new("tool_analyzer"), "overloaded")];

        let attempts = store
            .persist_attempts(&a.episode_name, &a.batch_id, &results)
            .unwrap();
        let artifact_path = store.persist(&a).unwrap();

        assert_ne!(attempts, artifact_path);
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&attempts).unwrap()).unwrap();
        assert_eq!(json["results"][0]["status"], "failed");
        assert_eq!(ArtifactStore::load_artifact(&artifact_path).unwrap(), a);
    }

    #[test]
    fn load_returns_persisted_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = artifact("episode one");
        let path = store.persist(&a).unwrap();
        assert_eq!(ArtifactStore::load_artifact(&path).unwrap(), a);
    }

    #[test]
    fn load_missing_is_not_found() {
        let err = ArtifactStore::load_artifact(Path::new("/nonexistent/x.json")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn attempts_include_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let episode = EpisodeName::new("failed run").unwrap();
        let results = vec![
            WorkerResult::failed(WorkerId::new("a"), "overloaded"),
            WorkerResult::expired(WorkerId::new("b"), "deadline"),
        ];
        let path = store
            .persist_attempts(&episode, &BatchId::from_raw("b1"), &results)
            .unwrap();
        assert_eq!(
            path,
            dir.path().join("failed_run").join(ATTEMPTS_DIR).join(ATTEMPTS_FILE)
        );
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["results"][0]["status"], "failed");
        assert_eq!(json["results"][1]["error"], "deadline");
        assert_eq!(json["episode_name"], "failed_run");
    }
}
