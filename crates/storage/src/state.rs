//! Persisted accounting state for one conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// System-instruction token allowance a fresh conversation starts with.
pub const DEFAULT_SYSTEM_TOKENS: usize = 500;

/// Running token-accounting state for a single conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub model_id: String,
    /// Sum of all message token estimates in this conversation.
    pub total_tokens: usize,
    /// Tokens attributed to the system instruction.
    pub system_tokens: usize,
    pub message_count: usize,
    /// User explicitly chose to continue after the soft warning fired.
    pub continued_past_warning: bool,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            model_id: model_id.into(),
            total_tokens: 0,
            system_tokens: DEFAULT_SYSTEM_TOKENS,
            message_count: 0,
            continued_past_warning: false,
            updated_at: Utc::now(),
        }
    }

    /// Reset accounting to defaults, keeping the conversation's identity.
    pub fn reset(&mut self) {
        self.total_tokens = 0;
        self.system_tokens = DEFAULT_SYSTEM_TOKENS;
        self.message_count = 0;
        self.continued_past_warning = false;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_defaults() {
        let state = ConversationState::new("c1", "gpt-4o");
        assert_eq!(state.total_tokens, 0);
        assert_eq!(state.system_tokens, DEFAULT_SYSTEM_TOKENS);
        assert_eq!(state.message_count, 0);
        assert!(!state.continued_past_warning);
    }

    #[test]
    fn test_reset_keeps_identity() {
        let mut state = ConversationState::new("c1", "gpt-4o");
        state.total_tokens = 9000;
        state.system_tokens = 1200;
        state.message_count = 14;
        state.continued_past_warning = true;

        state.reset();

        assert_eq!(state.conversation_id, "c1");
        assert_eq!(state.model_id, "gpt-4o");
        assert_eq!(state.total_tokens, 0);
        assert_eq!(state.system_tokens, DEFAULT_SYSTEM_TOKENS);
        assert_eq!(state.message_count, 0);
        assert!(!state.continued_past_warning);
    }
}
