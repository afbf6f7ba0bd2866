//! Settings types. Every section deserializes with defaults so a partial
//! user file is always valid JSON for the loader.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DelveSettings {
    pub research: ResearchSettings,
    pub llm: LlmSettings,
    pub graph: GraphSettings,
    pub output: OutputSettings,
}

impl DelveSettings {
    /// Reject values that would make a cycle spin or never end.
    pub fn validate(&self) -> Result<()> {
        if self.research.poll_interval_secs == 0 {
            return Err(SettingsError::InvalidValue {
                field: "research.pollIntervalSecs",
                reason: "must be > 0",
            });
        }
        if self.research.max_wait_secs < self.research.poll_interval_secs {
            return Err(SettingsError::InvalidValue {
                field: "research.maxWaitSecs",
                reason: "must be >= research.pollIntervalSecs",
            });
        }
        if self.graph.max_attempts == 0 {
            return Err(SettingsError::InvalidValue {
                field: "graph.maxAttempts",
                reason: "must be > 0",
            });
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(SettingsError::InvalidValue {
                field: "llm.temperature",
                reason: "must be within 0.0..=1.0",
            });
        }
        Ok(())
    }
}

/// Prompt/model profile for worker cohorts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchProfile {
    /// Full prompts, configured model, web search.
    #[default]
    Full,
    /// Short prompts, small model, no tools. For smoke runs.
    Quick,
}

/// Batch polling and cycle policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResearchSettings {
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    /// Fewer successful workers than this fails the cycle before synthesis.
    pub min_successful_workers: usize,
    pub profile: ResearchProfile,
    /// Graph namespace shared by every episode.
    pub group_id: String,
}

impl ResearchSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_wait_secs: 3600,
            min_successful_workers: 1,
            profile: ResearchProfile::Full,
            group_id: "deep_research".to_string(),
        }
    }
}

/// Model selection for workers and the critical analyst.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    pub worker_model: String,
    pub quick_model: String,
    pub analyst_model: String,
    pub worker_max_tokens: u32,
    pub analyst_max_tokens: u32,
    pub temperature: f64,
    pub web_search: bool,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            worker_model: "claude-sonnet-4-5-20250929".to_string(),
            quick_model: "claude-haiku-4-5-20251001".to_string(),
            analyst_model: "claude-sonnet-4-5-20250929".to_string(),
            worker_max_tokens: 4000,
            analyst_max_tokens: 2000,
            temperature: 0.3,
            web_search: true,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

/// Graph store endpoint and commit retry budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphSettings {
    pub base_url: String,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            max_attempts: 4,
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
            request_timeout_secs: 120,
        }
    }
}

/// Output locations. Empty strings resolve under `~/.delve`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputSettings {
    pub sessions_dir: String,
    pub ledger_path: String,
}
