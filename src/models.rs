//! Model names accepted by the upstream service. Read-only configuration;
//! clients may send any provider's model string and it is passed through
//! after normalization.

pub const AVAILABLE_MODELS: &[&str] = &[
    // Expert tier
    "o3",
    "o3-deep-research",
    "gpt-5",
    "claude-4.1-opus",
    "claude-4-opus",
    "claude-3.7-sonnet-thinking",
    // Advanced tier
    "gpt-4.1",
    "o4-mini",
    "o4-mini-deep-research",
    "claude-4-sonnet",
    "claude-3.7-sonnet",
    "gemini-2.5-pro",
    "perplexity-sonar-reasoning-pro",
    "perplexity-sonar-reasoning",
    "perplexity-sonar-pro",
    "perplexity-sonar-deep-research",
    "llama-3-405b-instruct",
    "grok-4",
    "grok-3",
    // Standard tier
    "gpt-4.1-mini",
    "gpt-4.1-nano",
    "gpt-5-mini",
    "gpt-5-nano",
    "claude-3.5-haiku",
    "gemini-2.5-flash",
    "perplexity-sonar",
    "llama-3-70b",
    "grok-3-mini",
    "deepseek-v3",
    "deepseek-r1",
    // Vision
    "gpt-4.1-vision",
    "gpt-4.1-mini-vision",
    "gpt-4.1-nano-vision",
    "gpt-5-mini-vision",
    "gpt-5-nano-vision",
];

/// Normalize a client-supplied model name.
pub fn map_model(model: &str) -> String {
    model.trim().to_lowercase()
}

pub fn is_valid_model(model: &str) -> bool {
    AVAILABLE_MODELS.contains(&model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_model_normalizes() {
        assert_eq!(map_model("  Claude-4-Sonnet "), "claude-4-sonnet");
    }

    #[test]
    fn known_model_is_valid() {
        assert!(is_valid_model("gemini-2.5-pro"));
        assert!(!is_valid_model("gpt-3"));
    }
}
