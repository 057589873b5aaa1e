//! Per-model token limits and the subscription tier.
//!
//! The catalog plays the role the remote model-config service plays in the
//! full product: it answers "how many tokens does this model allow?" with
//! built-in defaults that the composition root can override.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Subscription tier. The free tier gets exactly half of every limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Subscribed,
    Free,
}

/// Supplies the user's current tier to the budget manager.
pub trait TierProvider: Send + Sync {
    fn tier(&self) -> Tier;
}

/// A tier that never changes. Suits composition roots that read the
/// subscription flag once at startup, and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedTier(pub Tier);

impl TierProvider for FixedTier {
    fn tier(&self) -> Tier {
        self.0
    }
}

/// Token limits for a single model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    /// Maximum tokens the model accepts as input context.
    pub max_input_tokens: usize,
    /// Maximum tokens the model will produce in one response.
    pub max_output_tokens: usize,
}

impl ModelLimits {
    pub fn new(max_input_tokens: usize, max_output_tokens: usize) -> Self {
        Self {
            max_input_tokens,
            max_output_tokens,
        }
    }

    /// Effective limits for a tier. Free-tier limits are halved, integer
    /// division.
    pub fn for_tier(&self, tier: Tier) -> ModelLimits {
        match tier {
            Tier::Subscribed => *self,
            Tier::Free => ModelLimits {
                max_input_tokens: self.max_input_tokens / 2,
                max_output_tokens: self.max_output_tokens / 2,
            },
        }
    }
}

/// Built-in limits for known model families.
const BUILTIN_LIMITS: &[(&str, usize, usize)] = &[
    ("gpt-4o", 128000, 16384),
    ("gpt-4o-mini", 128000, 16384),
    ("gpt-4-turbo", 128000, 4096),
    ("gpt-3.5-turbo", 16385, 4096),
    ("claude-3-5-sonnet", 200000, 8192),
    ("claude-3-5-haiku", 200000, 8192),
    ("claude-3-opus", 200000, 4096),
    ("gemini-1.5-pro", 1048576, 8192),
    ("gemini-1.5-flash", 1048576, 8192),
    ("llama3.2", 128000, 4096),
];

/// Fallback for models the catalog has never heard of.
const DEFAULT_LIMITS: ModelLimits = ModelLimits {
    max_input_tokens: 16000,
    max_output_tokens: 4000,
};

/// Lookup table from model id to token limits.
///
/// Resolution order: exact id match, then the longest built-in/overridden key
/// the id contains (so "claude-3-5-sonnet-20241022" resolves to
/// "claude-3-5-sonnet"), then the default entry.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    limits: HashMap<String, ModelLimits>,
    default: ModelLimits,
}

impl ModelCatalog {
    pub fn new() -> Self {
        let mut limits = HashMap::new();
        for (model, max_input, max_output) in BUILTIN_LIMITS {
            limits.insert(model.to_string(), ModelLimits::new(*max_input, *max_output));
        }
        Self {
            limits,
            default: DEFAULT_LIMITS,
        }
    }

    /// Add or replace the limits for a model id.
    pub fn insert(&mut self, model_id: impl Into<String>, limits: ModelLimits) {
        self.limits.insert(model_id.into(), limits);
    }

    /// Replace the fallback used for unknown models.
    pub fn set_default(&mut self, limits: ModelLimits) {
        self.default = limits;
    }

    /// Resolve the limits for a model id.
    pub fn limits_for(&self, model_id: &str) -> ModelLimits {
        if let Some(limits) = self.limits.get(model_id) {
            return *limits;
        }

        let id_lower = model_id.to_lowercase();
        self.limits
            .iter()
            .filter(|(key, _)| id_lower.contains(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, limits)| *limits)
            .unwrap_or(self.default)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_tier_halves_limits() {
        let limits = ModelLimits::new(16385, 4097);
        let free = limits.for_tier(Tier::Free);
        assert_eq!(free.max_input_tokens, 8192);
        assert_eq!(free.max_output_tokens, 2048);

        let subscribed = limits.for_tier(Tier::Subscribed);
        assert_eq!(subscribed, limits);
    }

    #[test]
    fn test_exact_lookup() {
        let catalog = ModelCatalog::new();
        let limits = catalog.limits_for("gpt-3.5-turbo");
        assert_eq!(limits.max_input_tokens, 16385);
    }

    #[test]
    fn test_versioned_id_resolves_to_family() {
        let catalog = ModelCatalog::new();
        let limits = catalog.limits_for("claude-3-5-sonnet-20241022");
        assert_eq!(limits.max_input_tokens, 200000);
        assert_eq!(limits.max_output_tokens, 8192);
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let catalog = ModelCatalog::new();
        let limits = catalog.limits_for("mystery-model-9000");
        assert_eq!(limits, DEFAULT_LIMITS);
    }

    #[test]
    fn test_override_wins_over_builtin() {
        let mut catalog = ModelCatalog::new();
        catalog.insert("gpt-4o", ModelLimits::new(32000, 2000));
        assert_eq!(catalog.limits_for("gpt-4o").max_input_tokens, 32000);
    }
}
