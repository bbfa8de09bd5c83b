//! Subscription manager reconciling declarations with live store listeners.

use crate::declarations::Subscriptions;
use crate::error::{ConnectError, Result};
use crate::query::{build_query_ref, snapshot_value};
use crate::store::{Reference, Snapshot, StoreHandle};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::plan::SubscriptionPlan;
use super::types::{ChangeHook, Listener, SubscriptionState};

/// State written by store callbacks.
#[derive(Default)]
struct LiveState {
    values: SubscriptionState,
    /// Generation of the listener currently allowed to write each key.
    generations: HashMap<String, u64>,
}

/// Part of the manager shared with store callbacks.
struct Shared {
    mounted: AtomicBool,
    state: Mutex<LiveState>,
    on_change: RwLock<Option<ChangeHook>>,
}

impl Shared {
    /// Record a value emitted for `key` by the listener of `generation`.
    fn receive(&self, key: &str, generation: u64, snapshot: &Snapshot, ordered: bool) {
        {
            let mut state = self.state.lock();
            if !self.mounted.load(Ordering::SeqCst) {
                trace!(key, "discarding value delivered after unmount");
                return;
            }
            if state.generations.get(key) != Some(&generation) {
                trace!(key, generation, "discarding value from a released listener");
                return;
            }
            state
                .values
                .insert(key.to_string(), snapshot_value(snapshot, ordered));
        }

        trace!(key, "subscription value updated");
        self.notify(key);
    }

    fn notify(&self, key: &str) {
        // Clone out so the hook may itself replace the hook.
        let hook = self.on_change.read().clone();
        if let Some(hook) = hook {
            hook(key);
        }
    }
}

/// A query reference built but not yet registered.
struct Prepared {
    key: String,
    path: String,
    ordered: bool,
    reference: Box<dyn Reference>,
}

/// Owns the live listeners of one bound component.
///
/// Store callbacks patch the subscription state only while the manager is
/// mounted and only for the listener currently registered under their key.
pub struct SubscriptionManager {
    store: StoreHandle,
    listeners: HashMap<String, Listener>,
    shared: Arc<Shared>,
    next_generation: u64,
}

impl SubscriptionManager {
    /// Create an unmounted manager with no listeners.
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            listeners: HashMap::new(),
            shared: Arc::new(Shared {
                mounted: AtomicBool::new(false),
                state: Mutex::new(LiveState::default()),
                on_change: RwLock::new(None),
            }),
            next_generation: 1,
        }
    }

    /// Install the hook called after every state change.
    pub fn set_change_hook(&self, hook: ChangeHook) {
        *self.shared.on_change.write() = Some(hook);
    }

    /// Start accepting store values.
    pub fn mount(&self) {
        self.shared.mounted.store(true, Ordering::SeqCst);
    }

    pub fn is_mounted(&self) -> bool {
        self.shared.mounted.load(Ordering::SeqCst)
    }

    /// Register a listener for every subscription.
    ///
    /// All query references are built before any listener is registered, so
    /// a rejected query leaves the registry untouched.
    pub fn subscribe(&mut self, subscriptions: &Subscriptions) -> Result<()> {
        let prepared = self.prepare(subscriptions)?;
        self.register(prepared);
        Ok(())
    }

    /// Build the query reference of every subscription without registering.
    fn prepare(&self, subscriptions: &Subscriptions) -> Result<Vec<Prepared>> {
        subscriptions
            .iter()
            .map(|(key, query)| {
                let base = self.store.reference(&query.path);
                let reference = build_query_ref(base, &query.modifiers).map_err(|e| match e {
                    ConnectError::InvalidQuery { reason, .. } => ConnectError::InvalidQuery {
                        key: key.clone(),
                        reason,
                    },
                    other => other,
                })?;
                Ok(Prepared {
                    key: key.clone(),
                    path: query.path.clone(),
                    ordered: query.is_ordered(),
                    reference,
                })
            })
            .collect()
    }

    fn register(&mut self, prepared: Vec<Prepared>) {
        for Prepared {
            key,
            path,
            ordered,
            reference,
        } in prepared
        {
            if self.listeners.contains_key(&key) {
                warn!(key = %key, "replacing a listener that was not released");
                self.unsubscribe([key.as_str()]);
            }

            let generation = self.next_generation;
            self.next_generation += 1;
            self.shared
                .state
                .lock()
                .generations
                .insert(key.clone(), generation);

            let shared = Arc::clone(&self.shared);
            let callback_key = key.clone();
            let registration = reference.on_value(Arc::new(move |snapshot: &Snapshot| {
                shared.receive(&callback_key, generation, snapshot, ordered);
            }));

            debug!(key = %key, path = %path, ordered, generation, "subscribed");
            self.listeners
                .insert(key, Listener::new(path, generation, registration));
        }
    }

    /// Release the listeners registered under `keys`.
    ///
    /// Values are dropped from the subscription state only while mounted.
    /// Keys without a listener are skipped.
    pub fn unsubscribe<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            let Some(listener) = self.listeners.remove(key) else {
                debug!(key, "no listener to release");
                continue;
            };

            let path = listener.path().to_string();
            let generation = listener.generation();
            listener.release();

            let removed = {
                let mut state = self.shared.state.lock();
                if state.generations.get(key) == Some(&generation) {
                    state.generations.remove(key);
                }
                if self.shared.mounted.load(Ordering::SeqCst) {
                    state.values.remove(key).is_some()
                } else {
                    false
                }
            };

            debug!(key, path = %path, generation, "unsubscribed");
            if removed {
                self.shared.notify(key);
            }
        }
    }

    /// Release removed and changed keys, then register added and changed ones.
    ///
    /// Every acquired query is built first: when the store rejects one,
    /// nothing is released and the current listeners stay in place.
    pub fn apply(&mut self, plan: &SubscriptionPlan) -> Result<()> {
        let prepared = self.prepare(&plan.acquires())?;
        self.unsubscribe(plan.releases());
        self.register(prepared);
        Ok(())
    }

    /// Stop accepting values and release every listener.
    pub fn unmount(&mut self) {
        self.shared.mounted.store(false, Ordering::SeqCst);
        let keys: Vec<String> = self.listeners.keys().cloned().collect();
        self.unsubscribe(keys);
    }

    /// Copy of the current subscription state.
    pub fn state(&self) -> SubscriptionState {
        self.shared.state.lock().values.clone()
    }

    pub fn listener(&self, key: &str) -> Option<&Listener> {
        self.listeners.get(key)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Registered path per key.
    pub fn listener_paths(&self) -> BTreeMap<String, String> {
        self.listeners
            .iter()
            .map(|(key, listener)| (key.clone(), listener.path().to_string()))
            .collect()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if !self.listeners.is_empty() {
            self.unmount();
        }
    }
}
