//! The budget manager: a stateful service owning one active conversation's
//! accounting, constructed and wired by the application's composition root.
//!
//! Collaborators are injected: a model catalog for limits, an estimator for
//! token counts, a tier provider for the subscription flag, a state store for
//! persistence, and an event bus for UI notification. Business rejections are
//! returned as [`TokenValidation`] values; storage failures are logged and
//! swallowed, leaving the in-memory state authoritative until the next save
//! succeeds.

use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

use shared::estimate::TokenEstimator;
use shared::events::{BudgetEvent, EventBus, Subscription};
use shared::model::{ModelCatalog, ModelLimits, TierProvider};
use storage::{ConversationState, LoadOutcome, StateStore};

use crate::ledger::MessageLedger;
use crate::usage::{UsageDecision, UsageTracker};
use crate::validator::{
    self, BudgetSnapshot, Operation, TokenValidation, HARD_LIMIT_RATIO, SYSTEM_TOKEN_CAP_RATIO,
};

/// A message already in the conversation, used to rebuild the ledger when the
/// active conversation changes.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub message_id: String,
    pub text: String,
}

impl HistoryMessage {
    pub fn new(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            text: text.into(),
        }
    }
}

/// Point-in-time view of the active conversation's budget.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetUsage {
    pub conversation_id: String,
    pub model_id: String,
    pub total_tokens: usize,
    pub system_tokens: usize,
    pub message_count: usize,
    pub max_input_tokens: usize,
    pub usage_percent: f64,
}

struct ActiveConversation {
    state: ConversationState,
    ledger: MessageLedger,
}

pub struct BudgetManager {
    catalog: ModelCatalog,
    estimator: Box<dyn TokenEstimator>,
    tier: Box<dyn TierProvider>,
    store: StateStore,
    bus: Arc<EventBus>,
    active: Mutex<Option<ActiveConversation>>,
    usage: Mutex<UsageTracker>,
    usage_path: PathBuf,
}

impl BudgetManager {
    pub fn new(
        catalog: ModelCatalog,
        estimator: Box<dyn TokenEstimator>,
        tier: Box<dyn TierProvider>,
        store: StateStore,
        bus: Arc<EventBus>,
    ) -> Self {
        let usage_path = store.base_dir().join("usage.json");
        let usage = if usage_path.exists() {
            UsageTracker::load_from(&usage_path).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "could not read usage history, starting fresh");
                UsageTracker::new()
            })
        } else {
            UsageTracker::new()
        };

        Self {
            catalog,
            estimator,
            tier,
            store,
            bus,
            active: Mutex::new(None),
            usage: Mutex::new(usage),
            usage_path,
        }
    }

    /// Subscribe to budget events. Equivalent to subscribing on the shared
    /// bus directly.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Make a conversation active, loading its persisted state and rebuilding
    /// the message ledger from `history`.
    ///
    /// `history` must be the conversation's complete message list; the ledger
    /// built from it is authoritative, so a stored total that disagrees with
    /// it is corrected. A failed integrity check on load publishes
    /// [`BudgetEvent::ConversationMustReset`].
    pub fn set_conversation(
        &self,
        conversation_id: &str,
        model_id: &str,
        history: &[HistoryMessage],
    ) {
        let mut must_reset = false;
        let mut state = match self.store.load(conversation_id) {
            Ok(LoadOutcome::Loaded(mut state)) => {
                state.model_id = model_id.to_string();
                state
            }
            Ok(LoadOutcome::Reset(mut state)) => {
                must_reset = true;
                state.model_id = model_id.to_string();
                state
            }
            Ok(LoadOutcome::Missing) => ConversationState::new(conversation_id, model_id),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    conversation_id,
                    "could not load conversation state, starting fresh"
                );
                ConversationState::new(conversation_id, model_id)
            }
        };

        let mut ledger = MessageLedger::new();
        for message in history {
            ledger.record(
                message.message_id.clone(),
                self.estimator.estimate(&message.text),
            );
        }
        state.total_tokens = ledger.reconcile(state.total_tokens);
        state.message_count = ledger.len();

        self.persist(&state);
        let limits = self.effective_limits(&state.model_id);
        if must_reset {
            self.bus.publish(BudgetEvent::ConversationMustReset {
                conversation_id: state.conversation_id.clone(),
            });
        }
        self.publish_totals(&state, limits);

        *self.active.lock() = Some(ActiveConversation { state, ledger });
    }

    /// Pre-flight check for an operation. Uses the active conversation's
    /// accounting when one is set, otherwise an empty-conversation baseline,
    /// so prospective first messages can be validated too.
    pub fn validate_operation(
        &self,
        op: Operation,
        text: &str,
        model_id: &str,
    ) -> TokenValidation {
        let limits = self.effective_limits(model_id);
        let snapshot = self
            .active
            .lock()
            .as_ref()
            .map(|conv| snapshot_of(&conv.state))
            .unwrap_or_default();
        validator::validate(op, text, limits, snapshot, self.estimator.as_ref())
    }

    /// Record an accepted user message: re-validate, update the ledger and
    /// running total, count it against the daily allowance, persist, publish.
    ///
    /// Returns `None` when no conversation is active.
    pub fn add_message(&self, message_id: &str, text: &str) -> Option<TokenValidation> {
        let mut guard = self.active.lock();
        let conv = match guard.as_mut() {
            Some(conv) => conv,
            None => {
                tracing::warn!("add_message called with no active conversation");
                return None;
            }
        };

        let limits = self.effective_limits(&conv.state.model_id);
        let validation = validator::validate(
            Operation::SendMessage,
            text,
            limits,
            snapshot_of(&conv.state),
            self.estimator.as_ref(),
        );

        if !validation.is_valid {
            if validation.exceeds_limit {
                self.bus.publish(BudgetEvent::MaxTokensReached {
                    conversation_id: conv.state.conversation_id.clone(),
                    total_tokens: conv.state.total_tokens,
                    max_input_tokens: limits.max_input_tokens,
                });
            }
            return Some(validation);
        }

        let tokens = self.estimator.estimate(text);
        let previous = conv.ledger.record(message_id, tokens);
        let adjusted = (conv.state.total_tokens + tokens).saturating_sub(previous.unwrap_or(0));
        conv.state.total_tokens = conv.ledger.reconcile(adjusted);
        conv.state.message_count = conv.ledger.len();
        conv.state.updated_at = Utc::now();

        self.persist(&conv.state);
        {
            let mut usage = self.usage.lock();
            usage.record_message(tokens as u64);
            if let Err(err) = usage.save_to(&self.usage_path) {
                tracing::warn!(error = %err, "could not persist usage history");
            }
        }
        self.publish_totals(&conv.state, limits);

        Some(validation)
    }

    /// Record an assistant response. Responses are never validated (the
    /// tokens are already spent) but they move the running total, which is
    /// how a conversation drifts into warning territory.
    pub fn record_response(&self, message_id: &str, text: &str) {
        let mut guard = self.active.lock();
        let conv = match guard.as_mut() {
            Some(conv) => conv,
            None => {
                tracing::warn!("record_response called with no active conversation");
                return;
            }
        };

        let tokens = self.estimator.estimate(text);
        let previous = conv.ledger.record(message_id, tokens);
        let adjusted = (conv.state.total_tokens + tokens).saturating_sub(previous.unwrap_or(0));
        conv.state.total_tokens = conv.ledger.reconcile(adjusted);
        conv.state.message_count = conv.ledger.len();
        conv.state.updated_at = Utc::now();

        self.persist(&conv.state);
        let limits = self.effective_limits(&conv.state.model_id);
        self.publish_totals(&conv.state, limits);

        let hard_limit = (limits.max_input_tokens as f64 * HARD_LIMIT_RATIO) as usize;
        if current_usage(&conv.state, limits) > hard_limit {
            self.bus.publish(BudgetEvent::MaxTokensReached {
                conversation_id: conv.state.conversation_id.clone(),
                total_tokens: conv.state.total_tokens,
                max_input_tokens: limits.max_input_tokens,
            });
        }
    }

    /// Re-estimate an edited message and adjust the totals.
    pub fn update_message(&self, message_id: &str, new_text: &str) -> Option<TokenValidation> {
        let mut guard = self.active.lock();
        let conv = guard.as_mut()?;

        let limits = self.effective_limits(&conv.state.model_id);
        let validation = validator::validate(
            Operation::EditMessage,
            new_text,
            limits,
            snapshot_of(&conv.state),
            self.estimator.as_ref(),
        );
        if !validation.is_valid {
            return Some(validation);
        }

        let tokens = self.estimator.estimate(new_text);
        let previous = conv.ledger.record(message_id, tokens);
        let adjusted = (conv.state.total_tokens + tokens).saturating_sub(previous.unwrap_or(0));
        conv.state.total_tokens = conv.ledger.reconcile(adjusted);
        conv.state.message_count = conv.ledger.len();
        conv.state.updated_at = Utc::now();

        self.persist(&conv.state);
        self.publish_totals(&conv.state, limits);
        Some(validation)
    }

    /// Drop a message from the ledger and subtract its tokens.
    pub fn remove_message(&self, message_id: &str) {
        let mut guard = self.active.lock();
        let conv = match guard.as_mut() {
            Some(conv) => conv,
            None => return,
        };

        let Some(tokens) = conv.ledger.remove(message_id) else {
            return;
        };
        let adjusted = conv.state.total_tokens.saturating_sub(tokens);
        conv.state.total_tokens = conv.ledger.reconcile(adjusted);
        conv.state.message_count = conv.ledger.len();
        conv.state.updated_at = Utc::now();

        self.persist(&conv.state);
        let limits = self.effective_limits(&conv.state.model_id);
        self.publish_totals(&conv.state, limits);
    }

    /// Validate and install a new system instruction. On success its token
    /// estimate replaces the conversation's system-token figure.
    pub fn set_system_instruction(&self, text: &str) -> Option<TokenValidation> {
        let mut guard = self.active.lock();
        let conv = guard.as_mut()?;

        let limits = self.effective_limits(&conv.state.model_id);
        let validation = validator::validate(
            Operation::SystemInstruction,
            text,
            limits,
            snapshot_of(&conv.state),
            self.estimator.as_ref(),
        );
        if validation.is_valid {
            conv.state.system_tokens = self.estimator.estimate(text);
            conv.state.updated_at = Utc::now();
            self.persist(&conv.state);
            self.publish_totals(&conv.state, limits);
        }
        Some(validation)
    }

    /// The user acknowledged the soft warning and chose to continue; stop
    /// warning for this conversation.
    pub fn continue_past_warning(&self) {
        let mut guard = self.active.lock();
        if let Some(conv) = guard.as_mut() {
            conv.state.continued_past_warning = true;
            conv.state.updated_at = Utc::now();
            self.persist(&conv.state);
        }
    }

    /// Discard the active conversation's accounting and start over.
    pub fn reset_conversation(&self) {
        let mut guard = self.active.lock();
        if let Some(conv) = guard.as_mut() {
            conv.state.reset();
            conv.ledger.clear();
            self.persist(&conv.state);
            let limits = self.effective_limits(&conv.state.model_id);
            self.publish_totals(&conv.state, limits);
        }
    }

    /// Current budget numbers for the active conversation.
    pub fn usage_snapshot(&self) -> Option<BudgetUsage> {
        let guard = self.active.lock();
        let conv = guard.as_ref()?;
        let limits = self.effective_limits(&conv.state.model_id);
        Some(BudgetUsage {
            conversation_id: conv.state.conversation_id.clone(),
            model_id: conv.state.model_id.clone(),
            total_tokens: conv.state.total_tokens,
            system_tokens: conv.state.system_tokens,
            message_count: conv.state.message_count,
            max_input_tokens: limits.max_input_tokens,
            usage_percent: usage_percent(&conv.state, limits),
        })
    }

    /// Whether today's message allowance permits another message.
    pub fn check_daily_allowance(&self) -> UsageDecision {
        self.usage.lock().check(self.tier.tier())
    }

    fn effective_limits(&self, model_id: &str) -> ModelLimits {
        self.catalog.limits_for(model_id).for_tier(self.tier.tier())
    }

    fn persist(&self, state: &ConversationState) {
        if let Err(err) = self.store.save(state) {
            tracing::warn!(
                error = %err,
                conversation_id = %state.conversation_id,
                "could not persist conversation state"
            );
        }
    }

    fn publish_totals(&self, state: &ConversationState, limits: ModelLimits) {
        self.bus.publish(BudgetEvent::TokensChanged {
            conversation_id: state.conversation_id.clone(),
            total_tokens: state.total_tokens,
            max_input_tokens: limits.max_input_tokens,
            usage_percent: usage_percent(state, limits),
        });
    }
}

fn snapshot_of(state: &ConversationState) -> BudgetSnapshot {
    BudgetSnapshot {
        total_tokens: state.total_tokens,
        system_tokens: state.system_tokens,
        continued_past_warning: state.continued_past_warning,
    }
}

fn current_usage(state: &ConversationState, limits: ModelLimits) -> usize {
    let system_cap = (limits.max_input_tokens as f64 * SYSTEM_TOKEN_CAP_RATIO) as usize;
    state.total_tokens + state.system_tokens.min(system_cap)
}

fn usage_percent(state: &ConversationState, limits: ModelLimits) -> f64 {
    if limits.max_input_tokens == 0 {
        return 100.0;
    }
    current_usage(state, limits) as f64 / limits.max_input_tokens as f64 * 100.0
}
