//! Budget event types and the publish/subscribe bus.
//!
//! UI layers used to register listener callbacks directly on the manager;
//! here they subscribe to a bus instead. A subscription lives as long as its
//! handle: drop the handle and the bus prunes the slot on the next publish,
//! so one misbehaving subscriber can never block the rest.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender};
use uuid::Uuid;

/// Events published by the budget manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BudgetEvent {
    /// Running totals changed for the active conversation.
    TokensChanged {
        conversation_id: String,
        total_tokens: usize,
        max_input_tokens: usize,
        usage_percent: f64,
    },
    /// Usage crossed the hard threshold; further messages will be rejected.
    MaxTokensReached {
        conversation_id: String,
        total_tokens: usize,
        max_input_tokens: usize,
    },
    /// Stored state failed verification or the budget is unrecoverable; the
    /// conversation must start over.
    ConversationMustReset { conversation_id: String },
}

impl BudgetEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            BudgetEvent::TokensChanged {
                conversation_id, ..
            } => conversation_id,
            BudgetEvent::MaxTokensReached {
                conversation_id, ..
            } => conversation_id,
            BudgetEvent::ConversationMustReset { conversation_id } => conversation_id,
        }
    }
}

/// Handle for a live subscription. Dropping it ends the subscription.
pub struct Subscription {
    id: Uuid,
    receiver: Receiver<BudgetEvent>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next pending event, if any.
    pub fn try_recv(&self) -> Option<BudgetEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything published since the last call.
    pub fn drain(&self) -> Vec<BudgetEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Synchronous publish/subscribe channel for budget events.
pub struct EventBus {
    subscribers: RwLock<Vec<(Uuid, Sender<BudgetEvent>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = channel();
        let id = Uuid::new_v4();
        self.subscribers.write().push((id, tx));
        Subscription { id, receiver: rx }
    }

    /// Deliver an event to every live subscriber. Subscribers whose handle
    /// was dropped are pruned here.
    pub fn publish(&self, event: BudgetEvent) {
        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                if tx.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            self.subscribers
                .write()
                .retain(|(id, _)| !dead.contains(id));
            tracing::debug!(pruned = dead.len(), "dropped stale event subscriptions");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
