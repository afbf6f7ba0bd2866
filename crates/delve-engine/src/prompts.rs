//! Worker roster and prompt construction.
//!
//! A cohort is always built from the fixed roster below, in roster order.
//! That order is the submission order every later stage reports in.

use delve_core::batch::{ModelParameters, WorkerRequest};
use delve_core::ids::WorkerId;
use delve_core::messages::{format_transcript, Turn};
use delve_settings::{LlmSettings, ResearchProfile};

/// Token budget for the quick profile.
const QUICK_MAX_TOKENS: u32 = 500;

/// One specialist in the cohort.
#[derive(Clone, Copy, Debug)]
pub struct WorkerRole {
    pub id: &'static str,
    pub label: &'static str,
    system_full: &'static str,
    system_quick: &'static str,
}

impl WorkerRole {
    pub fn system_prompt(&self, profile: ResearchProfile) -> &'static str {
        match profile {
            ResearchProfile::Full => self.system_full,
            ResearchProfile::Quick => self.system_quick,
        }
    }
}

pub const ROSTER: [WorkerRole; 3] = [
    WorkerRole {
        id: "academic_researcher",
        label: "Academic Research",
        system_full: "You are an academic researcher specializing in deep technical literature. \
Search for papers, technical documentation, and theoretical frameworks. \
Use the web_search tool extensively. \
Return dense, signal-rich findings with citations.",
        system_quick: "You are an academic researcher. Summarize the key technical literature in a few sentences.",
    },
    WorkerRole {
        id: "industry_intelligence",
        label: "Industry Intelligence",
        system_full: "You are an industry analyst who tracks real implementations. \
Find case studies, engineering blogs, and production use cases. \
Use the web_search tool extensively. \
Return proven, real-world usage with metrics.",
        system_quick: "You are an industry analyst. Name the companies and products doing this in a few sentences.",
    },
    WorkerRole {
        id: "tool_analyzer",
        label: "Tool Analysis",
        system_full: "You are a tools researcher who understands frameworks and implementations. \
Search GitHub, documentation, and tool comparisons. \
Use the web_search tool extensively. \
Return technical trade-offs and usage patterns.",
        system_quick: "You are a tools researcher. List the main tools and their trade-offs in a few sentences.",
    },
];

/// Generation parameters for a worker cohort under `profile`.
pub fn worker_params(profile: ResearchProfile, llm: &LlmSettings) -> ModelParameters {
    match profile {
        ResearchProfile::Full => ModelParameters {
            model: llm.worker_model.clone(),
            max_tokens: llm.worker_max_tokens,
            temperature: llm.temperature,
            web_search: llm.web_search,
        },
        ResearchProfile::Quick => ModelParameters {
            model: llm.quick_model.clone(),
            max_tokens: QUICK_MAX_TOKENS,
            temperature: llm.temperature,
            web_search: false,
        },
    }
}

/// User message shared by every worker: the query, the tasking context and
/// the conversation so far.
pub fn worker_message(query: &str, context: &str, history: &[Turn]) -> String {
    let mut message = format!("Research Query: {query}\n\n");
    if !context.trim().is_empty() {
        message.push_str(&format!("Tasking Context: {}\n\n", context.trim()));
    }
    if !history.is_empty() {
        message.push_str("Conversation So Far:\n");
        message.push_str(&format_transcript(history));
    }
    message.push_str("Conduct deep research using your specialized expertise.");
    message
}

/// Build one request per roster entry, in roster order.
pub fn build_cohort(
    profile: ResearchProfile,
    llm: &LlmSettings,
    query: &str,
    context: &str,
    history: &[Turn],
) -> Vec<WorkerRequest> {
    let params = worker_params(profile, llm);
    let prompt_text = worker_message(query, context, history);
    ROSTER
        .iter()
        .map(|role| WorkerRequest {
            worker_id: WorkerId::new(role.id),
            label: role.label.to_string(),
            system_prompt: role.system_prompt(profile).to_string(),
            prompt_text: prompt_text.clone(),
            params: params.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cohort_follows_roster_order() {
        let cohort = build_cohort(
            ResearchProfile::Full,
            &LlmSettings::default(),
            "agent memory",
            "",
            &[],
        );
        let ids: Vec<&str> = cohort.iter().map(|r| r.worker_id.as_str()).collect();
        assert_eq!(
            ids,
            ["academic_researcher", "industry_intelligence", "tool_analyzer"]
        );
        assert!(cohort.iter().all(|r| r.params.web_search));
        assert!(cohort.iter().all(|r| r.params.max_tokens == 4000));
    }

    #[test]
    fn quick_profile_is_small_and_toolless() {
        let llm = LlmSettings::default();
        let cohort = build_cohort(ResearchProfile::Quick, &llm, "q", "", &[]);
        for req in &cohort {
            assert_eq!(req.params.model, llm.quick_model);
            assert_eq!(req.params.max_tokens, QUICK_MAX_TOKENS);
            assert!(!req.params.web_search);
            assert!(!req.system_prompt.contains("web_search"));
        }
    }

    #[test]
    fn message_carries_query_context_and_history() {
        let history = vec![Turn::user("focus on vendors"), Turn::assistant("noted")];
        let msg = worker_message("graph memory", "B2B only", &history);
        assert!(msg.starts_with("Research Query: graph memory"));
        assert!(msg.contains("Tasking Context: B2B only"));
        assert!(msg.contains("USER: focus on vendors"));
        assert!(msg.contains("ASSISTANT: noted"));
    }

    #[test]
    fn empty_context_is_omitted() {
        let msg = worker_message("q", "  ", &[]);
        assert!(!msg.contains("Tasking Context"));
        assert!(!msg.contains("Conversation So Far"));
    }
}
