//! Daily usage-limit bookkeeping.
//!
//! Counts accepted messages per UTC day against a tier-dependent allowance,
//! separately from the per-conversation token budget: a user can be well
//! inside every context window and still out of messages for the day. Like
//! the validator, this returns decisions rather than raising errors.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::model::Tier;
use std::collections::HashMap;
use std::path::Path;

/// Daily message allowance for subscribers.
pub const SUBSCRIBED_DAILY_MESSAGES: u32 = 200;
/// Daily message allowance for the free tier.
pub const FREE_DAILY_MESSAGES: u32 = 25;
/// Warn once usage reaches this share of the allowance.
const USAGE_WARNING_RATIO: f64 = 0.8;

/// Counters for one UTC day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDay {
    pub messages: u32,
    pub tokens: u64,
}

/// Decision for a prospective message against the daily allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDecision {
    Allowed,
    /// Allowed, but usage has crossed the warning share of the allowance.
    Warning { used: u32, allowance: u32 },
    /// Daily allowance exhausted; no more messages today.
    Exhausted { allowance: u32 },
}

impl UsageDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, UsageDecision::Exhausted { .. })
    }
}

/// Message and token counters keyed by UTC day.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UsageTracker {
    days: HashMap<String, UsageDay>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allowance(tier: Tier) -> u32 {
        match tier {
            Tier::Subscribed => SUBSCRIBED_DAILY_MESSAGES,
            Tier::Free => FREE_DAILY_MESSAGES,
        }
    }

    fn today_key() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    pub fn today(&self) -> UsageDay {
        self.day(&Self::today_key())
    }

    fn day(&self, key: &str) -> UsageDay {
        self.days.get(key).copied().unwrap_or_default()
    }

    /// Decide whether another message fits today's allowance.
    pub fn check(&self, tier: Tier) -> UsageDecision {
        self.check_on(&Self::today_key(), tier)
    }

    fn check_on(&self, key: &str, tier: Tier) -> UsageDecision {
        let used = self.day(key).messages;
        let allowance = Self::allowance(tier);

        if used >= allowance {
            UsageDecision::Exhausted { allowance }
        } else if used as f64 >= allowance as f64 * USAGE_WARNING_RATIO {
            UsageDecision::Warning { used, allowance }
        } else {
            UsageDecision::Allowed
        }
    }

    /// Count an accepted message against today.
    pub fn record_message(&mut self, tokens: u64) {
        self.record_on(&Self::today_key(), tokens);
    }

    fn record_on(&mut self, key: &str, tokens: u64) {
        let day = self.days.entry(key.to_string()).or_default();
        day.messages += 1;
        day.tokens += tokens;
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_day_is_allowed() {
        let tracker = UsageTracker::new();
        assert_eq!(tracker.check(Tier::Free), UsageDecision::Allowed);
    }

    #[test]
    fn test_warning_then_exhaustion() {
        let mut tracker = UsageTracker::new();
        let key = "2026-08-05";

        // 19 of 25 is under the 80% mark; 20 crosses it.
        for _ in 0..19 {
            tracker.record_on(key, 10);
        }
        assert_eq!(tracker.check_on(key, Tier::Free), UsageDecision::Allowed);

        tracker.record_on(key, 10);
        assert_eq!(
            tracker.check_on(key, Tier::Free),
            UsageDecision::Warning {
                used: 20,
                allowance: 25
            }
        );

        for _ in 0..5 {
            tracker.record_on(key, 10);
        }
        assert_eq!(
            tracker.check_on(key, Tier::Free),
            UsageDecision::Exhausted { allowance: 25 }
        );
        assert!(!tracker.check_on(key, Tier::Free).is_allowed());
    }

    #[test]
    fn test_subscriber_allowance_is_larger() {
        let mut tracker = UsageTracker::new();
        let key = "2026-08-05";
        for _ in 0..25 {
            tracker.record_on(key, 10);
        }
        assert_eq!(
            tracker.check_on(key, Tier::Free),
            UsageDecision::Exhausted { allowance: 25 }
        );
        assert_eq!(
            tracker.check_on(key, Tier::Subscribed),
            UsageDecision::Allowed
        );
    }

    #[test]
    fn test_day_rollover_resets_count() {
        let mut tracker = UsageTracker::new();
        for _ in 0..25 {
            tracker.record_on("2026-08-04", 10);
        }
        assert_eq!(
            tracker.check_on("2026-08-04", Tier::Free),
            UsageDecision::Exhausted { allowance: 25 }
        );
        assert_eq!(
            tracker.check_on("2026-08-05", Tier::Free),
            UsageDecision::Allowed
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usage.json");

        let mut tracker = UsageTracker::new();
        tracker.record_on("2026-08-05", 150);
        tracker.record_on("2026-08-05", 80);
        tracker.save_to(&path).unwrap();

        let loaded = UsageTracker::load_from(&path).unwrap();
        assert_eq!(
            loaded.day("2026-08-05"),
            UsageDay {
                messages: 2,
                tokens: 230
            }
        );
    }
}
