//! Per-rule cooldown tracking.
//!
//! The tracker maps a rule id to the instant its cooldown ends. It is a
//! process-local cache over the durable `AlertRule::last_triggered`; use
//! [`CooldownTracker::restore`] on start-up to rebuild it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::types::{AlertRule, RuleId};

const SHARDS: usize = 16;

/// A sharded map from rule id to cooldown expiry.
///
/// Every operation on one rule id locks exactly one shard, so concurrent scans
/// of different tenants rarely contend and the check-and-set in
/// [`CooldownTracker::try_mark`] is linearized per rule.
#[derive(Debug)]
pub struct CooldownTracker {
    shards: Vec<Mutex<HashMap<RuleId, DateTime<Utc>>>>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CooldownTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, rule_id: &RuleId) -> &Mutex<HashMap<RuleId, DateTime<Utc>>> {
        let mut hasher = DefaultHasher::new();
        rule_id.hash(&mut hasher);
        // Truncation is fine, only the low bits pick the shard.
        #[allow(clippy::cast_possible_truncation)]
        let index = hasher.finish() as usize % SHARDS;
        &self.shards[index]
    }

    /// Returns true while `now` is before the rule's cooldown expiry.
    /// An expired entry is evicted.
    #[must_use]
    pub fn is_cooling_down(&self, rule_id: &RuleId, now: DateTime<Utc>) -> bool {
        let mut shard = self.shard(rule_id).lock();
        match shard.get(rule_id) {
            Some(until) if now < *until => true,
            Some(_) => {
                shard.remove(rule_id);
                false
            }
            None => false,
        }
    }

    /// Returns when the rule's cooldown ends, if it is still cooling down.
    #[must_use]
    pub fn cooling_until(&self, rule_id: &RuleId, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let shard = self.shard(rule_id).lock();
        shard.get(rule_id).copied().filter(|until| now < *until)
    }

    /// Starts a cooldown of `cooldown_minutes` from `now`, replacing any entry.
    pub fn mark_triggered(&self, rule_id: RuleId, cooldown_minutes: u32, now: DateTime<Utc>) {
        let until = now + Duration::minutes(i64::from(cooldown_minutes));
        self.shard(&rule_id).lock().insert(rule_id, until);
    }

    /// Atomically starts a cooldown unless one is active.
    ///
    /// Returns true if this call claimed the trigger. Of two concurrent callers
    /// for the same rule, at most one gets true.
    pub fn try_mark(&self, rule_id: RuleId, cooldown_minutes: u32, now: DateTime<Utc>) -> bool {
        let mut shard = self.shard(&rule_id).lock();
        if shard.get(&rule_id).is_some_and(|until| now < *until) {
            return false;
        }
        let until = now + Duration::minutes(i64::from(cooldown_minutes));
        shard.insert(rule_id, until);
        true
    }

    /// Forgets a rule's cooldown.
    pub fn clear(&self, rule_id: &RuleId) {
        self.shard(rule_id).lock().remove(rule_id);
    }

    /// Rebuilds entries from each rule's `last_triggered + cooldown_minutes`.
    ///
    /// Only rules still cooling down at `now` are inserted. Returns how many.
    pub fn restore<'a>(&self, rules: impl IntoIterator<Item = &'a AlertRule>, now: DateTime<Utc>) -> usize {
        let mut restored = 0;
        for rule in rules {
            if let Some(until) = rule.cooldown_until().filter(|until| now < *until) {
                let mut shard = self.shard(&rule.id).lock();
                let entry = shard.entry(rule.id).or_insert(until);
                if *entry < until {
                    *entry = until;
                }
                restored += 1;
            }
        }
        debug!(restored, "cooldowns restored from rule statistics");
        restored
    }

    /// Returns the number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
