//! Output limits of the models research cohorts run on.

#[derive(Clone, Debug)]
pub struct ClaudeModelInfo {
    pub name: &'static str,
    pub max_output: u32,
}

pub static CLAUDE_OPUS_4_6: ClaudeModelInfo = ClaudeModelInfo {
    name: "claude-opus-4-6",
    max_output: 128_000,
};

pub static CLAUDE_SONNET_4_5: ClaudeModelInfo = ClaudeModelInfo {
    name: "claude-sonnet-4-5-20250929",
    max_output: 64_000,
};

pub static CLAUDE_HAIKU_4_5: ClaudeModelInfo = ClaudeModelInfo {
    name: "claude-haiku-4-5-20251001",
    max_output: 64_000,
};

static KNOWN: &[&ClaudeModelInfo] = &[&CLAUDE_OPUS_4_6, &CLAUDE_SONNET_4_5, &CLAUDE_HAIKU_4_5];

pub fn find_model(name: &str) -> Option<&'static ClaudeModelInfo> {
    KNOWN.iter().find(|m| m.name == name).copied()
}

pub fn default_model() -> &'static ClaudeModelInfo {
    &CLAUDE_SONNET_4_5
}

/// Clamp a requested output budget to what the model can produce.
/// Unknown models pass through unchanged.
pub fn clamp_max_tokens(model: &str, requested: u32) -> u32 {
    find_model(model).map_or(requested, |info| requested.min(info.max_output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        assert_eq!(find_model("claude-haiku-4-5-20251001").unwrap().max_output, 64_000);
        assert!(find_model("gpt-4").is_none());
    }

    #[test]
    fn clamp_only_known_models() {
        assert_eq!(clamp_max_tokens("claude-haiku-4-5-20251001", 100_000), 64_000);
        assert_eq!(clamp_max_tokens("claude-haiku-4-5-20251001", 500), 500);
        assert_eq!(clamp_max_tokens("local-model", 100_000), 100_000);
    }

    #[test]
    fn default_model_is_sonnet() {
        assert_eq!(default_model().name, "claude-sonnet-4-5-20250929");
    }
}
