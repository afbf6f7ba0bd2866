//! Turns a raw research query into a short, searchable episode name.

use std::sync::Arc;

use tracing::{info, instrument};

use delve_core::batch::ModelParameters;
use delve_core::provider::{CompletionRequest, LlmProvider};
use delve_core::session::Session;
use delve_settings::LlmSettings;

use crate::error::EngineError;

const NAMING_MAX_TOKENS: u32 = 100;
const NAMING_TEMPERATURE: f64 = 0.3;

pub const NAMING_SYSTEM: &str = "You name research episodes. A name titles a folder \
and a knowledge graph episode, so it must be 3-8 words, keyword-focused and free of \
conversational filler. Respond with only the name.";

pub fn build_naming_prompt(query: &str) -> String {
    format!(
        "Research query: {query}\n\n\
         Examples:\n\
         \"arthur ai based on out nyc\" -> Arthur AI product and market analysis\n\
         \"how to optimize react performance\" -> React performance optimization strategies\n\
         \"kubernetes security best practices 2024\" -> Kubernetes security best practices"
    )
}

/// First non-blank line of a reply with wrapping quotes and a trailing
/// period removed. `None` when nothing is left.
pub fn clean_suggestion(reply: &str) -> Option<String> {
    let line = reply.lines().map(str::trim).find(|l| !l.is_empty())?;
    let name = line
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '*'))
        .trim_end_matches('.')
        .trim();
    (!name.is_empty()).then(|| name.to_string())
}

pub struct EpisodeNamer {
    provider: Arc<dyn LlmProvider>,
    params: ModelParameters,
}

impl EpisodeNamer {
    pub fn new(provider: Arc<dyn LlmProvider>, params: ModelParameters) -> Self {
        Self { provider, params }
    }

    pub fn from_settings(provider: Arc<dyn LlmProvider>, llm: &LlmSettings) -> Self {
        Self::new(
            provider,
            ModelParameters {
                model: llm.analyst_model.clone(),
                max_tokens: NAMING_MAX_TOKENS,
                temperature: NAMING_TEMPERATURE,
                web_search: false,
            },
        )
    }

    #[instrument(skip_all)]
    pub async fn suggest(&self, query: &str) -> Result<String, EngineError> {
        let request = CompletionRequest {
            system: NAMING_SYSTEM.to_string(),
            prompt: build_naming_prompt(query),
            params: self.params.clone(),
        };
        let completion = self.provider.complete(&request).await?;
        let name = clean_suggestion(&completion.text)
            .ok_or_else(|| EngineError::Naming("model returned no episode name".into()))?;
        info!(name = %name, "episode name suggested");
        Ok(name)
    }

    /// Base name for the session's episodes. An explicit name wins; a
    /// resumed session keeps the name of its first episode; otherwise the
    /// model suggests one from the query.
    pub async fn resolve(
        &self,
        explicit: Option<&str>,
        session: &Session,
        query: &str,
    ) -> Result<String, EngineError> {
        if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
            return Ok(name.to_string());
        }
        if let Some(first) = session.initial_episode() {
            return Ok(first.as_str().to_string());
        }
        self.suggest(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_llm::{MockProvider, MockResponse};

    #[test]
    fn suggestion_is_cleaned() {
        assert_eq!(
            clean_suggestion("\n\"React performance optimization strategies.\"\n").as_deref(),
            Some("React performance optimization strategies")
        );
        assert_eq!(
            clean_suggestion("Agent memory vendors\nsecond line").as_deref(),
            Some("Agent memory vendors")
        );
        assert_eq!(clean_suggestion("  \n \"\" "), None);
    }

    #[tokio::test]
    async fn suggest_asks_once_with_small_budget() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::text(
            "Agent memory vendor landscape",
        )]));
        let namer = EpisodeNamer::from_settings(provider.clone(), &LlmSettings::default());

        let name = namer.suggest("who sells memory for agents?").await.unwrap();
        assert_eq!(name, "Agent memory vendor landscape");
        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].params.max_tokens, NAMING_MAX_TOKENS);
        assert!(requests[0].prompt.starts_with("Research query: who sells memory for agents?"));
    }

    #[tokio::test]
    async fn blank_reply_is_an_error() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::text("   ")]));
        let namer = EpisodeNamer::from_settings(provider, &LlmSettings::default());
        let err = namer.suggest("q").await.unwrap_err();
        assert!(matches!(err, EngineError::Naming(_)));
    }

    #[tokio::test]
    async fn explicit_name_skips_the_model() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let namer = EpisodeNamer::from_settings(provider.clone(), &LlmSettings::default());
        let session = Session::new("/tmp/unused", "agent memory");

        let name = namer.resolve(Some("vendors"), &session, "agent memory").await.unwrap();
        assert_eq!(name, "vendors");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn fresh_session_gets_a_suggested_name_not_the_query() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::text(
            "Agent memory vendor landscape",
        )]));
        let namer = EpisodeNamer::from_settings(provider.clone(), &LlmSettings::default());
        let session = Session::new("/tmp/unused", "who sells memory for agents?");

        let name = namer
            .resolve(None, &session, "who sells memory for agents?")
            .await
            .unwrap();
        assert_eq!(name, "Agent memory vendor landscape");
        assert_ne!(name, "who sells memory for agents?");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn resumed_session_keeps_its_first_episode() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let namer = EpisodeNamer::from_settings(provider.clone(), &LlmSettings::default());
        let mut session = Session::new("/tmp/unused", "agent memory");
        session.set_episode_name("Agent memory vendors").unwrap();

        let name = namer.resolve(None, &session, "agent memory").await.unwrap();
        assert_eq!(name, "Agent_memory_vendors");
        assert_eq!(provider.call_count(), 0);
    }
}
