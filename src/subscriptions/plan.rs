//! Key-based diffing of subscription mappings.

use crate::declarations::Subscriptions;

/// What has to change to go from one subscription mapping to another.
///
/// The three key sets are pairwise disjoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionPlan {
    /// Keys only in the next mapping.
    pub added: Subscriptions,
    /// Keys only in the previous mapping (previous declarations).
    pub removed: Subscriptions,
    /// Keys in both whose path differs (next declarations).
    pub changed: Subscriptions,
}

impl SubscriptionPlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Keys whose listener must be released: removed ∪ changed.
    pub fn releases(&self) -> Vec<String> {
        self.removed
            .keys()
            .chain(self.changed.keys())
            .cloned()
            .collect()
    }

    /// Subscriptions that must be registered: added ∪ changed.
    pub fn acquires(&self) -> Subscriptions {
        self.added
            .iter()
            .chain(self.changed.iter())
            .map(|(key, query)| (key.clone(), query.clone()))
            .collect()
    }
}

/// Diff two subscription mappings.
///
/// A subscription's identity is its path: a key whose modifiers change but
/// whose path stays the same is left alone.
pub fn diff(previous: &Subscriptions, next: &Subscriptions) -> SubscriptionPlan {
    let mut plan = SubscriptionPlan::default();

    for (key, query) in next {
        match previous.get(key) {
            None => {
                plan.added.insert(key.clone(), query.clone());
            }
            Some(old) if old.path != query.path => {
                plan.changed.insert(key.clone(), query.clone());
            }
            Some(_) => {}
        }
    }

    for (key, query) in previous {
        if !next.contains_key(key) {
            plan.removed.insert(key.clone(), query.clone());
        }
    }

    plan
}
