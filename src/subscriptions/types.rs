//! Subscription types for live component bindings.

use crate::store::Registration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Called with the affected key after subscription state changes.
pub type ChangeHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Owns one live store registration.
#[derive(Debug)]
pub struct Listener {
    path: String,
    /// Distinguishes this listener from earlier ones for the same key.
    generation: u64,
    registration: Registration,
}

impl Listener {
    pub(crate) fn new(path: String, generation: u64, registration: Registration) -> Self {
        Self {
            path,
            generation,
            registration,
        }
    }

    /// Path this listener was registered for.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Release the store registration.
    pub(crate) fn release(self) {
        self.registration.cancel();
    }
}

/// Last value received per subscription key.
///
/// A missing key has not received a value yet; `null` means the store has
/// no data at that location.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionState(BTreeMap<String, Value>);

impl SubscriptionState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }

    pub(crate) fn insert(&mut self, key: String, value: Value) {
        self.0.insert(key, value);
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }
}
