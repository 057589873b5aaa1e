//! Per-message token ledger for the active conversation.
//!
//! Held in memory only; rebuilt from the message history when the active
//! conversation changes. The ledger is the source of truth when it and the
//! stored running total disagree.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MessageLedger {
    entries: HashMap<String, usize>,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the token estimate for a message, returning any previous value.
    pub fn record(&mut self, message_id: impl Into<String>, tokens: usize) -> Option<usize> {
        self.entries.insert(message_id.into(), tokens)
    }

    pub fn remove(&mut self, message_id: &str) -> Option<usize> {
        self.entries.remove(message_id)
    }

    pub fn tokens_for(&self, message_id: &str) -> Option<usize> {
        self.entries.get(message_id).copied()
    }

    pub fn sum(&self) -> usize {
        self.entries.values().sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Reconcile a stored running total against the ledger sum. Disagreement
    /// is logged and resolved in the ledger's favor.
    pub fn reconcile(&self, stored_total: usize) -> usize {
        let recomputed = self.sum();
        if recomputed != stored_total {
            tracing::warn!(
                stored = stored_total,
                recomputed,
                "running total drifted from message ledger, correcting"
            );
        }
        recomputed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_sum() {
        let mut ledger = MessageLedger::new();
        ledger.record("m1", 120);
        ledger.record("m2", 80);

        assert_eq!(ledger.sum(), 200);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.tokens_for("m1"), Some(120));
    }

    #[test]
    fn test_record_replaces_previous() {
        let mut ledger = MessageLedger::new();
        ledger.record("m1", 120);
        let previous = ledger.record("m1", 90);

        assert_eq!(previous, Some(120));
        assert_eq!(ledger.sum(), 90);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut ledger = MessageLedger::new();
        ledger.record("m1", 120);
        ledger.record("m2", 80);

        assert_eq!(ledger.remove("m1"), Some(120));
        assert_eq!(ledger.remove("m1"), None);
        assert_eq!(ledger.sum(), 80);
    }

    #[test]
    fn test_reconcile_agrees() {
        let mut ledger = MessageLedger::new();
        ledger.record("m1", 100);
        assert_eq!(ledger.reconcile(100), 100);
    }

    #[test]
    fn test_reconcile_corrects_drift() {
        let mut ledger = MessageLedger::new();
        ledger.record("m1", 100);
        ledger.record("m2", 50);
        assert_eq!(ledger.reconcile(999), 150);
    }
}
