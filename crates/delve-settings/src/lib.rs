//! # delve-settings
//!
//! Configuration for research cycles, LLM calls, graph commits and output
//! locations. Loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`DelveSettings::default()`]
//! 2. **User file** — `~/.delve/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `DELVE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, delve_home, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = DelveSettings::default();
        assert_eq!(settings.research.poll_interval_secs, 30);
        assert_eq!(settings.research.max_wait_secs, 3600);
        assert_eq!(settings.research.min_successful_workers, 1);
        assert_eq!(settings.research.profile, ResearchProfile::Full);
        assert_eq!(settings.research.group_id, "deep_research");
        assert_eq!(settings.llm.worker_max_tokens, 4000);
        assert_eq!(settings.llm.analyst_max_tokens, 2000);
        assert_eq!(settings.llm.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(settings.graph.max_attempts, 4);
        assert!(settings.validate().is_ok());
    }
}
