//! Condenses the conversation that led to a cycle into graph-ready context.
//!
//! The raw transcript is kept as the audit trail; the distilled text is what
//! the knowledge commit carries as its research context.

use std::sync::Arc;

use tracing::{info, instrument};

use delve_core::batch::ModelParameters;
use delve_core::messages::{format_transcript, Turn};
use delve_core::provider::{CompletionRequest, LlmProvider};
use delve_settings::LlmSettings;

use crate::error::EngineError;

const DISTILL_MAX_TOKENS: u32 = 2000;
const DISTILL_TEMPERATURE: f64 = 0.3;

pub const DISTILL_SYSTEM: &str = "You extract the essential signal from a research \
refinement conversation for a knowledge graph. The graph extracts named entities \
(people, companies, tools, methods) and verb-labelled relationships between them.";

pub fn build_distill_prompt(turns: &[Turn]) -> String {
    format!(
        "Read the whole conversation and write 3-8 concise paragraphs covering:\n\
         1. Mental models: how the user frames the problem.\n\
         2. Reframings: where the user corrected direction.\n\
         3. Constraints: explicit boundaries or requirements.\n\
         4. Priorities: what matters most.\n\
         5. Synthesis instructions: how the findings should be weighed.\n\n\
         Name every entity explicitly (never \"they\" or \"it\"). Write complete \
         subject-verb-object sentences using relational verbs such as requires, \
         enables, competes with, targets.\n\n\
         <conversation>\n{}</conversation>",
        format_transcript(turns)
    )
}

pub struct ConversationDistiller {
    provider: Arc<dyn LlmProvider>,
    params: ModelParameters,
}

impl ConversationDistiller {
    pub fn new(provider: Arc<dyn LlmProvider>, params: ModelParameters) -> Self {
        Self { provider, params }
    }

    pub fn from_settings(provider: Arc<dyn LlmProvider>, llm: &LlmSettings) -> Self {
        Self::new(
            provider,
            ModelParameters {
                model: llm.analyst_model.clone(),
                max_tokens: DISTILL_MAX_TOKENS,
                temperature: DISTILL_TEMPERATURE,
                web_search: false,
            },
        )
    }

    /// Distill `turns`. No turns means nothing to distill and no call.
    #[instrument(skip_all, fields(turns = turns.len()))]
    pub async fn distill(&self, turns: &[Turn]) -> Result<String, EngineError> {
        if turns.is_empty() {
            return Ok(String::new());
        }
        let request = CompletionRequest {
            system: DISTILL_SYSTEM.to_string(),
            prompt: build_distill_prompt(turns),
            params: self.params.clone(),
        };
        let completion = self.provider.complete(&request).await?;
        let text = completion.text.trim().to_string();
        info!(
            chars = text.len(),
            output_tokens = completion.usage.output_tokens,
            "conversation distilled"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_llm::{MockProvider, MockResponse};

    #[tokio::test]
    async fn no_turns_no_call() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let distiller = ConversationDistiller::from_settings(provider.clone(), &LlmSettings::default());
        assert_eq!(distiller.distill(&[]).await.unwrap(), "");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn transcript_goes_into_one_call() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::text(
            "  Acme Corp requires SOC 2.\n",
        )]));
        let distiller = ConversationDistiller::from_settings(provider.clone(), &LlmSettings::default());
        let turns = [Turn::user("only B2B vendors"), Turn::assistant("noted")];

        let text = distiller.distill(&turns).await.unwrap();
        assert_eq!(text, "Acme Corp requires SOC 2.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system, DISTILL_SYSTEM);
        assert_eq!(requests[0].params.max_tokens, DISTILL_MAX_TOKENS);
        assert!(!requests[0].params.web_search);
        assert!(requests[0].prompt.contains("USER: only B2B vendors"));
        assert!(requests[0].prompt.contains("ASSISTANT: noted"));
    }
}
