//! Pre-flight token budget validation.
//!
//! Decides whether a prospective operation fits inside the model's token
//! budget before anything is sent. Business-rule failures come back as a
//! structured result, never as an error; callers branch on the verdict.
//!
//! Budget shape:
//! - system instructions take at most 25% of max input
//! - a response reserve is withheld from the input allowance: 35% for
//!   complex queries, 25% otherwise, never below 500 tokens
//! - the conversation hard-stops once projected usage passes 90% of max
//!   input, with a soft warning at 80%

use shared::estimate::TokenEstimator;
use shared::model::ModelLimits;

/// Chat operations that consume input budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SendMessage,
    EditMessage,
    ReloadResponse,
    AddFile,
    SystemInstruction,
}

/// Fixed outcome messages, checked in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    HardLimitExceeded,
    InsufficientSpace,
    NoRoomForResponse,
    Passed,
}

impl ValidationReason {
    pub fn message(&self) -> &'static str {
        match self {
            ValidationReason::HardLimitExceeded => {
                "This conversation has reached the model's token limit. Start a new conversation to continue."
            }
            ValidationReason::InsufficientSpace => {
                "There isn't enough room left in this conversation for that message."
            }
            ValidationReason::NoRoomForResponse => {
                "Sending this would leave no room for a response."
            }
            ValidationReason::Passed => "Validation passed.",
        }
    }
}

/// Verdict for a prospective operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenValidation {
    pub is_valid: bool,
    /// Projected usage passed the hard threshold.
    pub exceeds_limit: bool,
    /// Tokens still usable for input after the response reserve.
    pub available_tokens: usize,
    /// Projected usage as a percentage of max input.
    pub usage_percent: f64,
    /// Soft warning: usage crossed the warning threshold and the user has
    /// not yet chosen to continue past it.
    pub warning: bool,
    /// The conversation cannot absorb further messages.
    pub force_new_conversation: bool,
    pub reason: ValidationReason,
}

impl TokenValidation {
    pub fn message(&self) -> &'static str {
        self.reason.message()
    }
}

/// Hard stop once projected usage passes this share of max input.
pub const HARD_LIMIT_RATIO: f64 = 0.90;
/// Soft warning threshold.
pub const WARNING_RATIO: f64 = 0.80;
/// System instructions may take at most this share of max input.
pub const SYSTEM_TOKEN_CAP_RATIO: f64 = 0.25;
/// Response reserve for ordinary queries.
pub const RESPONSE_RESERVE_RATIO: f64 = 0.25;
/// Response reserve for complex queries.
pub const COMPLEX_RESERVE_RATIO: f64 = 0.35;
/// Never reserve fewer tokens than this for the response.
pub const MIN_RESPONSE_TOKENS: usize = 500;

/// Queries containing any of these get the larger response reserve.
const COMPLEX_KEYWORDS: &[&str] = &[
    "analyze",
    "analyse",
    "compare",
    "comprehensive",
    "detailed",
    "explain",
    "in depth",
    "step by step",
    "summarize",
    "summarise",
    "walk me through",
];

/// Whether a query warrants extra response headroom.
pub fn is_complex_query(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMPLEX_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// What the validator needs to know about the current conversation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetSnapshot {
    pub total_tokens: usize,
    pub system_tokens: usize,
    pub continued_past_warning: bool,
}

/// Validate an operation against tier-adjusted model limits.
pub fn validate(
    op: Operation,
    text: &str,
    limits: ModelLimits,
    snapshot: BudgetSnapshot,
    estimator: &dyn TokenEstimator,
) -> TokenValidation {
    let input_tokens = estimator.estimate(text);
    let max_input = limits.max_input_tokens;

    let system_cap = (max_input as f64 * SYSTEM_TOKEN_CAP_RATIO) as usize;
    let effective_system = snapshot.system_tokens.min(system_cap);

    let reserve_ratio = if is_complex_query(text) {
        COMPLEX_RESERVE_RATIO
    } else {
        RESPONSE_RESERVE_RATIO
    };
    let response_reserve =
        ((max_input as f64 * reserve_ratio) as usize).max(MIN_RESPONSE_TOKENS);

    let current_usage = snapshot.total_tokens + effective_system;
    let projected_usage = current_usage + input_tokens;
    let available_tokens = max_input
        .saturating_sub(current_usage)
        .saturating_sub(response_reserve);

    let hard_limit = (max_input as f64 * HARD_LIMIT_RATIO) as usize;
    let exceeds_limit = projected_usage > hard_limit;
    let insufficient_space = input_tokens > available_tokens;
    let no_response_room = max_input.saturating_sub(projected_usage) < MIN_RESPONSE_TOKENS;

    let usage_percent = if max_input == 0 {
        100.0
    } else {
        projected_usage as f64 / max_input as f64 * 100.0
    };

    let (is_valid, reason) = if exceeds_limit {
        (false, ValidationReason::HardLimitExceeded)
    } else if insufficient_space {
        (false, ValidationReason::InsufficientSpace)
    } else if no_response_room {
        (false, ValidationReason::NoRoomForResponse)
    } else {
        (true, ValidationReason::Passed)
    };

    // The warning is independent of the verdict: totals grow through
    // unvalidated response tokens, so usage can sit between the warning and
    // hard thresholds while individual sends are rejected for space.
    let warning = !exceeds_limit
        && !snapshot.continued_past_warning
        && usage_percent >= WARNING_RATIO * 100.0;

    tracing::debug!(
        ?op,
        input_tokens,
        projected_usage,
        available_tokens,
        is_valid,
        "validated token operation"
    );

    TokenValidation {
        is_valid,
        exceeds_limit,
        available_tokens,
        usage_percent,
        warning,
        force_new_conversation: exceeds_limit,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::estimate::HeuristicEstimator;
    use shared::model::{ModelLimits, Tier};

    const LIMITS_16K: ModelLimits = ModelLimits {
        max_input_tokens: 16000,
        max_output_tokens: 4000,
    };

    fn validate_send(text: &str, snapshot: BudgetSnapshot) -> TokenValidation {
        validate(
            Operation::SendMessage,
            text,
            LIMITS_16K,
            snapshot,
            &HeuristicEstimator,
        )
    }

    #[test]
    fn test_worked_example_from_budget_rules() {
        // 16k model, 500 system tokens, empty conversation, 100-token message.
        let snapshot = BudgetSnapshot {
            total_tokens: 0,
            system_tokens: 500,
            continued_past_warning: false,
        };
        let text = "a".repeat(400); // 100 tokens, no complex keyword

        let result = validate_send(&text, snapshot);

        // reserve = max(500, 16000 * 0.25) = 4000
        // available = 16000 - 500 - 4000 = 11500
        assert!(result.is_valid);
        assert_eq!(result.reason, ValidationReason::Passed);
        assert_eq!(result.available_tokens, 11500);
        assert!(!result.exceeds_limit);
        assert!(!result.warning);
    }

    #[test]
    fn test_complex_query_reserves_more() {
        let snapshot = BudgetSnapshot {
            system_tokens: 500,
            ..Default::default()
        };

        let plain = validate_send(&"a".repeat(400), snapshot);
        let complex = validate_send(
            &format!("please analyze this {}", "a".repeat(380)),
            snapshot,
        );

        // 35% reserve instead of 25%: 5600 vs 4000 withheld.
        assert_eq!(plain.available_tokens, 11500);
        assert_eq!(complex.available_tokens, 9900);
    }

    #[test]
    fn test_complex_keywords_case_insensitive() {
        assert!(is_complex_query("EXPLAIN this to me"));
        assert!(is_complex_query("walk me through the setup"));
        assert!(!is_complex_query("what's the weather"));
    }

    #[test]
    fn test_hard_limit_rejects() {
        // 14000 + 500 system + 100 input = 14600 > 14400 (90% of 16000).
        let snapshot = BudgetSnapshot {
            total_tokens: 14000,
            system_tokens: 500,
            continued_past_warning: false,
        };
        let result = validate_send(&"a".repeat(400), snapshot);

        assert!(!result.is_valid);
        assert!(result.exceeds_limit);
        assert!(result.force_new_conversation);
        assert_eq!(result.reason, ValidationReason::HardLimitExceeded);
    }

    #[test]
    fn test_insufficient_space_rejects() {
        // available = 16000 - (8000 + 500) - 4000 = 3500; input 4000 tokens.
        let snapshot = BudgetSnapshot {
            total_tokens: 8000,
            system_tokens: 500,
            continued_past_warning: false,
        };
        let result = validate_send(&"a".repeat(16000), snapshot);

        assert!(!result.is_valid);
        assert!(!result.exceeds_limit);
        assert_eq!(result.reason, ValidationReason::InsufficientSpace);
    }

    #[test]
    fn test_rejection_priority_hard_limit_first() {
        // Overflows both the hard limit and the available space; the hard
        // limit message wins.
        let snapshot = BudgetSnapshot {
            total_tokens: 14000,
            system_tokens: 500,
            continued_past_warning: false,
        };
        let result = validate_send(&"a".repeat(20000), snapshot);
        assert_eq!(result.reason, ValidationReason::HardLimitExceeded);
    }

    #[test]
    fn test_warning_at_eighty_percent() {
        // Response tokens pushed the total up: 12400 + 500 + 100 = 13000
        // projected = 81.25%, past the warning mark but below the 90% stop.
        let snapshot = BudgetSnapshot {
            total_tokens: 12400,
            system_tokens: 500,
            continued_past_warning: false,
        };
        let result = validate_send(&"a".repeat(400), snapshot);

        assert!(result.warning);
        assert!(!result.exceeds_limit);
    }

    #[test]
    fn test_warning_suppressed_after_continue() {
        let snapshot = BudgetSnapshot {
            total_tokens: 12400,
            system_tokens: 500,
            continued_past_warning: true,
        };
        let result = validate_send(&"a".repeat(400), snapshot);

        assert!(!result.warning);
    }

    #[test]
    fn test_system_tokens_capped_at_quarter() {
        // 6000 claimed system tokens cap to 4000, so available is computed
        // from the cap: 16000 - 4000 - 4000 = 8000.
        let snapshot = BudgetSnapshot {
            total_tokens: 0,
            system_tokens: 6000,
            continued_past_warning: false,
        };
        let result = validate_send(&"a".repeat(400), snapshot);
        assert_eq!(result.available_tokens, 8000);
    }

    #[test]
    fn test_free_tier_halves_budget() {
        // Same inputs as the worked example on the halved limits.
        let limits = LIMITS_16K.for_tier(Tier::Free);
        assert_eq!(limits.max_input_tokens, 8000);

        let snapshot = BudgetSnapshot {
            total_tokens: 0,
            system_tokens: 500,
            continued_past_warning: false,
        };
        let result = validate(
            Operation::SendMessage,
            &"a".repeat(400),
            limits,
            snapshot,
            &HeuristicEstimator,
        );

        // reserve = max(500, 8000 * 0.25) = 2000; available = 8000 - 500 - 2000.
        assert!(result.is_valid);
        assert_eq!(result.available_tokens, 5500);
    }

    #[test]
    fn test_minimum_response_floor_on_tiny_models() {
        // 25% of 1000 is 250, below the 500-token floor.
        let limits = ModelLimits::new(1000, 500);
        let snapshot = BudgetSnapshot::default();
        let result = validate(
            Operation::SendMessage,
            "hello there",
            limits,
            snapshot,
            &HeuristicEstimator,
        );
        // available = 1000 - 0 - 500 = 500
        assert_eq!(result.available_tokens, 500);
    }
}
