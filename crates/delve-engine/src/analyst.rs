//! Critical synthesis over the successful worker outputs of one cycle.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use delve_core::artifact::WorkerOutput;
use delve_core::batch::ModelParameters;
use delve_core::provider::{CompletionRequest, LlmProvider};
use delve_settings::LlmSettings;

use crate::error::EngineError;

pub const ANALYST_SYSTEM: &str = "You are a skeptical senior researcher who reviews findings. \
Score relevance (1-10), filter noise, identify gaps, and highlight insights. \
Be ruthless about cutting noise. The user's time is valuable.";

/// Build the analyst prompt. Sections appear in the order given, which
/// callers keep equal to cohort submission order.
pub fn build_synthesis_prompt(query: &str, context: &str, outputs: &[WorkerOutput]) -> String {
    let mut prompt = format!("Original Research Query: {query}\n\n");
    if !context.trim().is_empty() {
        prompt.push_str(&format!("Tasking Context: {}\n\n", context.trim()));
    }
    for output in outputs {
        prompt.push_str(&format!(
            "{} FINDINGS:\n{}\n\n",
            output.label.to_uppercase(),
            output.text.trim()
        ));
    }
    prompt.push_str("Review critically. Score relevance, filter noise, identify gaps.");
    prompt
}

pub struct CriticalAnalyst {
    provider: Arc<dyn LlmProvider>,
    params: ModelParameters,
}

impl CriticalAnalyst {
    pub fn new(provider: Arc<dyn LlmProvider>, params: ModelParameters) -> Self {
        Self { provider, params }
    }

    /// Analyst parameters from settings: analyst model, no tools.
    pub fn from_settings(provider: Arc<dyn LlmProvider>, llm: &LlmSettings) -> Self {
        Self::new(
            provider,
            ModelParameters {
                model: llm.analyst_model.clone(),
                max_tokens: llm.analyst_max_tokens,
                temperature: llm.temperature,
                web_search: false,
            },
        )
    }

    /// One synthesis call over `outputs`. Refuses to run on an empty set.
    #[instrument(skip_all, fields(outputs = outputs.len(), provider = self.provider.name()))]
    pub async fn synthesize(
        &self,
        query: &str,
        context: &str,
        outputs: &[WorkerOutput],
    ) -> Result<String, EngineError> {
        if outputs.is_empty() {
            return Err(EngineError::Synthesis(
                "no successful worker outputs to synthesize".into(),
            ));
        }

        let request = CompletionRequest {
            system: ANALYST_SYSTEM.to_string(),
            prompt: build_synthesis_prompt(query, context, outputs),
            params: self.params.clone(),
        };
        let completion = self.provider.complete(&request).await?;
        if completion.text.trim().is_empty() {
            warn!(stop_reason = ?completion.stop_reason, "analyst returned no text");
            return Err(EngineError::Synthesis("analyst returned no text".into()));
        }
        info!(
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "synthesis complete"
        );
        Ok(completion.text)
    }
}
