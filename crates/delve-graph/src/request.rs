use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use delve_core::artifact::ResearchArtifact;
use delve_core::session::EpisodeName;

use crate::ontology::{self, EdgeRule, EntityTypeHint};

/// One episode submission. Built once per cycle and never changed between
/// retries, so its idempotency key is stable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphCommitRequest {
    pub episode_name: String,
    pub body_text: String,
    pub entity_type_hints: Vec<EntityTypeHint>,
    pub edge_rules: Vec<EdgeRule>,
    pub group_id: String,
    pub reference_time: DateTime<Utc>,
    pub source_description: String,
}

impl GraphCommitRequest {
    /// Hex SHA-256 over the episode name and body.
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.episode_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.body_text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Shape a research artifact into a commit request.
///
/// `episode` is used verbatim for the episode name; nothing here derives a
/// name from content. Every field depends only on the artifact, so rebuilding
/// from a persisted artifact yields an identical request.
pub fn build_commit_request(
    artifact: &ResearchArtifact,
    episode: &EpisodeName,
    group_id: &str,
) -> GraphCommitRequest {
    let hints = ontology::select_hints(&research_text(artifact));
    let edge_rules = ontology::rules_for(&hints);
    let body_text = shape_body(artifact, episode, &edge_rules);

    GraphCommitRequest {
        episode_name: episode.as_str().to_string(),
        source_description: source_description(artifact, episode, group_id),
        entity_type_hints: hints.into_iter().collect(),
        edge_rules,
        body_text,
        group_id: group_id.to_string(),
        reference_time: artifact.completed_at,
    }
}

/// The text hints are chosen from: what the research said, never the
/// headings or relationship lines this module adds around it.
fn research_text(artifact: &ResearchArtifact) -> String {
    let mut text = research_context(artifact).to_string();
    for output in &artifact.worker_outputs {
        text.push('\n');
        text.push_str(&output.text);
    }
    text.push('\n');
    text.push_str(&artifact.synthesis_text);
    text
}

/// The distilled conversation when there is one, else the raw context.
fn research_context(artifact: &ResearchArtifact) -> &str {
    if artifact.distilled_context.trim().is_empty() {
        &artifact.context
    } else {
        &artifact.distilled_context
    }
}

/// Labelled sections in cohort order, then the synthesis, then a plain
/// statement of the relationships the extractor should look for.
fn shape_body(artifact: &ResearchArtifact, episode: &EpisodeName, rules: &[EdgeRule]) -> String {
    let mut body = String::new();
    body.push_str(&format!("Research Episode: {episode}\n"));
    body.push_str(&format!("Research Topic: {}\n", artifact.topic));
    body.push_str(&format!("Research Type: {}\n", artifact.kind.as_str()));

    let context = research_context(artifact);
    if !context.trim().is_empty() {
        section(&mut body, "RESEARCH CONTEXT", context);
    }
    for output in &artifact.worker_outputs {
        let heading = format!("{} FINDINGS", output.label.to_uppercase());
        section(&mut body, &heading, &output.text);
    }
    section(&mut body, "CRITICAL ANALYSIS", &artifact.synthesis_text);

    body.push_str("\n\nRELATIONSHIPS\n");
    for rule in rules {
        let verbs: Vec<&str> = rule.verbs.iter().map(|v| v.phrase()).collect();
        body.push_str(&format!(
            "- A named {} {} a named {}.\n",
            rule.source.as_str().to_lowercase(),
            verbs.join(" or "),
            rule.target.as_str().to_lowercase(),
        ));
    }
    body
}

fn section(body: &mut String, heading: &str, text: &str) {
    body.push_str("\n\n");
    body.push_str(heading);
    body.push('\n');
    body.push_str(text.trim());
}

fn source_description(artifact: &ResearchArtifact, episode: &EpisodeName, group_id: &str) -> String {
    let workers: Vec<&str> = artifact
        .worker_outputs
        .iter()
        .map(|w| w.label.as_str())
        .collect();
    format!(
        "[METADATA]\nResearch Topic: {}\nEpisode: {}\nResearch Type: {}\nGroup ID: {}\nTimestamp: {}\nWorkers: {}",
        artifact.topic,
        episode,
        artifact.kind.as_str(),
        group_id,
        artifact.completed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        workers.join(", "),
    )
}
