//! Subscription Tracking
//!
//! Tracks which subscription keys each subscriber holds and, inversely,
//! which subscribers are interested in each key.
//!
//! # Design
//!
//! Two indexes are kept in step under a single lock:
//! - subscriber → keys, so a disconnect can drop everything at once
//! - key → subscribers, so per-key routing is a single lookup
//!
//! Adding or removing keys reports which keys gained their first
//! subscriber or lost their last one.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::domain::feed::{SubscriberId, SubscriptionKey};

// =============================================================================
// Subscription Changes
// =============================================================================

/// Keys whose demand changed as a result of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Keys that went from zero subscribers to one.
    pub added: HashSet<SubscriptionKey>,
    /// Keys that went from one subscriber to zero.
    pub removed: HashSet<SubscriptionKey>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Create changes with only additions.
    #[must_use]
    pub fn added_only(keys: impl IntoIterator<Item = SubscriptionKey>) -> Self {
        Self {
            added: keys.into_iter().collect(),
            removed: HashSet::new(),
        }
    }

    /// Create changes with only removals.
    #[must_use]
    pub fn removed_only(keys: impl IntoIterator<Item = SubscriptionKey>) -> Self {
        Self {
            added: HashSet::new(),
            removed: keys.into_iter().collect(),
        }
    }
}

// =============================================================================
// Index
// =============================================================================

#[derive(Debug, Default)]
struct SubscriptionIndex {
    by_subscriber: HashMap<SubscriberId, HashSet<SubscriptionKey>>,
    by_key: HashMap<SubscriptionKey, HashSet<SubscriberId>>,
}

impl SubscriptionIndex {
    fn add(&mut self, subscriber: SubscriberId, keys: &[SubscriptionKey]) -> Vec<SubscriptionKey> {
        let held = self.by_subscriber.entry(subscriber).or_default();
        let mut first_demand = Vec::new();

        for key in keys {
            if !held.insert(key.clone()) {
                continue;
            }

            let holders = self.by_key.entry(key.clone()).or_default();
            holders.insert(subscriber);
            if holders.len() == 1 {
                first_demand.push(key.clone());
            }
        }

        if held.is_empty() {
            self.by_subscriber.remove(&subscriber);
        }

        first_demand
    }

    fn remove(
        &mut self,
        subscriber: SubscriberId,
        keys: &[SubscriptionKey],
    ) -> Vec<SubscriptionKey> {
        let Some(held) = self.by_subscriber.get_mut(&subscriber) else {
            return vec![];
        };

        let mut released = Vec::new();
        for key in keys {
            if !held.remove(key) {
                continue;
            }
            if Self::detach(&mut self.by_key, key, subscriber) {
                released.push(key.clone());
            }
        }

        if held.is_empty() {
            self.by_subscriber.remove(&subscriber);
        }

        released
    }

    fn remove_subscriber(&mut self, subscriber: SubscriberId) -> Vec<SubscriptionKey> {
        let Some(held) = self.by_subscriber.remove(&subscriber) else {
            return vec![];
        };

        held.into_iter()
            .filter(|key| Self::detach(&mut self.by_key, key, subscriber))
            .collect()
    }

    /// Returns true when the key has no subscribers left.
    fn detach(
        by_key: &mut HashMap<SubscriptionKey, HashSet<SubscriberId>>,
        key: &str,
        subscriber: SubscriberId,
    ) -> bool {
        let Some(holders) = by_key.get_mut(key) else {
            return false;
        };
        holders.remove(&subscriber);
        if holders.is_empty() {
            by_key.remove(key);
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Thread-safe subscription tracker shared by the gateway and dispatcher.
///
/// # Example
///
/// ```rust
/// use quote_relay::domain::subscription::SubscriptionManager;
///
/// let manager = SubscriptionManager::new();
///
/// let changes = manager.add_subscriptions(1, &["btcusdt".to_string()]);
/// assert!(changes.added.contains("btcusdt"));
///
/// // Second subscriber shares the key - no new demand
/// let changes = manager.add_subscriptions(2, &["btcusdt".to_string()]);
/// assert!(changes.added.is_empty());
///
/// assert_eq!(manager.subscribers_for("btcusdt").len(), 2);
///
/// manager.subscriber_disconnected(1);
/// let changes = manager.subscriber_disconnected(2);
/// assert!(changes.removed.contains("btcusdt"));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    index: RwLock<SubscriptionIndex>,
}

impl SubscriptionManager {
    /// Create an empty subscription manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register keys for a subscriber.
    pub fn add_subscriptions(
        &self,
        subscriber: SubscriberId,
        keys: &[SubscriptionKey],
    ) -> SubscriptionChanges {
        SubscriptionChanges::added_only(self.index.write().add(subscriber, keys))
    }

    /// Drop keys for a subscriber. Unknown keys are ignored.
    pub fn remove_subscriptions(
        &self,
        subscriber: SubscriberId,
        keys: &[SubscriptionKey],
    ) -> SubscriptionChanges {
        SubscriptionChanges::removed_only(self.index.write().remove(subscriber, keys))
    }

    /// Drop every key a subscriber holds.
    pub fn subscriber_disconnected(&self, subscriber: SubscriberId) -> SubscriptionChanges {
        SubscriptionChanges::removed_only(self.index.write().remove_subscriber(subscriber))
    }

    /// Subscribers currently registered for `key`.
    #[must_use]
    pub fn subscribers_for(&self, key: &str) -> HashSet<SubscriberId> {
        self.index
            .read()
            .by_key
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Keys held by a subscriber.
    #[must_use]
    pub fn keys_for(&self, subscriber: SubscriberId) -> HashSet<SubscriptionKey> {
        self.index
            .read()
            .by_subscriber
            .get(&subscriber)
            .cloned()
            .unwrap_or_default()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let index = self.index.read();
        SubscriptionStats {
            key_count: index.by_key.len(),
            subscriber_count: index.by_subscriber.len(),
        }
    }
}

/// Subscription statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of distinct keys with subscribers.
    pub key_count: usize,
    /// Number of subscribers holding at least one key.
    pub subscriber_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<SubscriptionKey> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn add_new_key_reports_first_demand() {
        let manager = SubscriptionManager::new();

        let changes = manager.add_subscriptions(1, &keys(&["btcusdt"]));

        assert!(changes.added.contains("btcusdt"));
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn shared_key_reported_once() {
        let manager = SubscriptionManager::new();
        manager.add_subscriptions(1, &keys(&["btcusdt"]));

        let changes = manager.add_subscriptions(2, &keys(&["btcusdt"]));

        assert!(changes.is_empty());
        assert_eq!(manager.subscribers_for("btcusdt"), HashSet::from([1, 2]));
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let manager = SubscriptionManager::new();
        manager.add_subscriptions(1, &keys(&["btcusdt"]));

        let changes = manager.add_subscriptions(1, &keys(&["btcusdt"]));

        assert!(changes.is_empty());
        assert_eq!(manager.stats().key_count, 1);
    }

    #[test]
    fn add_empty_list_leaves_no_entry() {
        let manager = SubscriptionManager::new();

        manager.add_subscriptions(1, &[]);

        assert_eq!(manager.stats().subscriber_count, 0);
    }

    #[test]
    fn remove_with_remaining_subscribers() {
        let manager = SubscriptionManager::new();
        manager.add_subscriptions(1, &keys(&["btcusdt"]));
        manager.add_subscriptions(2, &keys(&["btcusdt"]));

        let changes = manager.remove_subscriptions(1, &keys(&["btcusdt"]));

        assert!(changes.removed.is_empty());
        assert_eq!(manager.subscribers_for("btcusdt"), HashSet::from([2]));
    }

    #[test]
    fn remove_last_subscriber_releases_key() {
        let manager = SubscriptionManager::new();
        manager.add_subscriptions(1, &keys(&["btcusdt"]));

        let changes = manager.remove_subscriptions(1, &keys(&["btcusdt"]));

        assert!(changes.removed.contains("btcusdt"));
        assert!(manager.subscribers_for("btcusdt").is_empty());
        assert_eq!(manager.stats(), SubscriptionStats::default());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let manager = SubscriptionManager::new();
        manager.add_subscriptions(1, &keys(&["btcusdt"]));

        assert!(manager.remove_subscriptions(2, &keys(&["btcusdt"])).is_empty());
        assert!(manager.remove_subscriptions(1, &keys(&["ethusdt"])).is_empty());
        assert_eq!(manager.stats().key_count, 1);
        assert!(manager.keys_for(1).contains("btcusdt"));
    }

    #[test]
    fn disconnect_cleans_up_all_keys() {
        let manager = SubscriptionManager::new();
        manager.add_subscriptions(1, &keys(&["btcusdt", "ethusdt"]));
        manager.add_subscriptions(2, &keys(&["ethusdt"]));

        let changes = manager.subscriber_disconnected(1);

        assert_eq!(changes.removed, HashSet::from(["btcusdt".to_string()]));
        assert!(manager.keys_for(1).is_empty());
        assert_eq!(manager.subscribers_for("ethusdt"), HashSet::from([2]));
    }

    #[test]
    fn disconnect_unknown_subscriber() {
        let manager = SubscriptionManager::new();
        manager.add_subscriptions(1, &keys(&["btcusdt"]));

        assert!(manager.subscriber_disconnected(9).is_empty());
        assert_eq!(manager.stats().subscriber_count, 1);
    }

    #[test]
    fn keys_for_returns_held_keys() {
        let manager = SubscriptionManager::new();
        manager.add_subscriptions(1, &keys(&["btcusdt", "ethusdt"]));

        let held = manager.keys_for(1);

        assert_eq!(held.len(), 2);
        assert!(held.contains("ethusdt"));
        assert!(manager.keys_for(99).is_empty());
    }

    #[test]
    fn concurrent_subscribe_and_disconnect() {
        use std::sync::Arc;
        use std::thread;

        let manager = Arc::new(SubscriptionManager::new());
        let handles: Vec<_> = (0..10u64)
            .map(|i| {
                let m = Arc::clone(&manager);
                thread::spawn(move || {
                    m.add_subscriptions(i, &[format!("KEY{i}"), "SHARED".to_string()]);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(manager.stats().subscriber_count, 10);
        assert_eq!(manager.stats().key_count, 11);

        let handles: Vec<_> = (0..10u64)
            .map(|i| {
                let m = Arc::clone(&manager);
                thread::spawn(move || {
                    m.subscriber_disconnected(i);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(manager.stats(), SubscriptionStats::default());
    }
}
