//! Shared test helpers: a store that records every call made to it.

#![allow(dead_code)]

use livebind::{
    ConnectError, Database, Reference, Registration, Result, Snapshot, StoreHandle, ValueCallback,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A call observed by the recording store.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Ref(String),
    Modifier {
        path: String,
        name: &'static str,
        args: Vec<Value>,
    },
    OnValue {
        id: u64,
        path: String,
    },
    Cancel {
        id: u64,
    },
    Set {
        path: String,
        value: Value,
    },
    Push {
        path: String,
        value: Value,
    },
}

struct Callback {
    path: String,
    callback: ValueCallback,
    cancelled: bool,
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<Call>>,
    callbacks: Mutex<HashMap<u64, Callback>>,
    next_id: Mutex<u64>,
    /// Values emitted synchronously from inside `on_value`.
    immediate: Mutex<HashMap<String, Value>>,
    reject_writes: Mutex<bool>,
}

/// Store double that records calls and lets tests emit snapshots by hand.
#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: Arc<Inner>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> StoreHandle {
        StoreHandle::new(self.clone())
    }

    /// Emit `value` synchronously to every future listener on `path`.
    pub fn respond_with(&self, path: &str, value: Value) {
        self.inner.immediate.lock().insert(path.to_string(), value);
    }

    pub fn reject_writes(&self) {
        *self.inner.reject_writes.lock() = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.inner.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn registrations(&self) -> usize {
        self.count(|c| matches!(c, Call::OnValue { .. }))
    }

    pub fn cancellations(&self) -> usize {
        self.count(|c| matches!(c, Call::Cancel { .. }))
    }

    /// Paths with a listener that has not been cancelled.
    pub fn active_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .inner
            .callbacks
            .lock()
            .values()
            .filter(|c| !c.cancelled)
            .map(|c| c.path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Deliver a snapshot to the active listeners on `path`.
    pub fn emit(&self, path: &str, snapshot: Snapshot) -> usize {
        self.deliver(path, snapshot, false)
    }

    /// Deliver a snapshot to every listener ever registered on `path`,
    /// cancelled ones included.
    pub fn emit_late(&self, path: &str, snapshot: Snapshot) -> usize {
        self.deliver(path, snapshot, true)
    }

    pub fn emit_value(&self, path: &str, value: Value) -> usize {
        self.emit(path, Snapshot::from_value(last_segment(path), value))
    }

    fn deliver(&self, path: &str, snapshot: Snapshot, include_cancelled: bool) -> usize {
        let targets: Vec<ValueCallback> = self
            .inner
            .callbacks
            .lock()
            .values()
            .filter(|c| c.path == path && (include_cancelled || !c.cancelled))
            .map(|c| Arc::clone(&c.callback))
            .collect();
        for callback in &targets {
            callback(&snapshot);
        }
        targets.len()
    }

    fn record(&self, call: Call) {
        self.inner.calls.lock().push(call);
    }
}

impl Database for RecordingStore {
    fn name(&self) -> &str {
        "recording"
    }

    fn reference(&self, path: &str) -> Box<dyn Reference> {
        self.record(Call::Ref(path.to_string()));
        Box::new(RecordingRef {
            store: self.clone(),
            path: path.to_string(),
        })
    }
}

fn last_segment(path: &str) -> Option<String> {
    path.rsplit('/').find(|s| !s.is_empty()).map(str::to_string)
}

struct RecordingRef {
    store: RecordingStore,
    path: String,
}

impl RecordingRef {
    fn modifier(&self, name: &'static str, args: Vec<Value>) -> Result<Box<dyn Reference>> {
        self.store.record(Call::Modifier {
            path: self.path.clone(),
            name,
            args,
        });
        Ok(Box::new(RecordingRef {
            store: self.store.clone(),
            path: self.path.clone(),
        }))
    }
}

fn bound_args(value: &Value, key: Option<&str>) -> Vec<Value> {
    let mut args = vec![value.clone()];
    args.extend(key.map(|k| Value::String(k.to_string())));
    args
}

impl Reference for RecordingRef {
    fn path(&self) -> &str {
        &self.path
    }

    fn child(&self, path: &str) -> Box<dyn Reference> {
        self.store.reference(&format!("{}/{}", self.path, path))
    }

    fn order_by_child(&self, child: &str) -> Result<Box<dyn Reference>> {
        self.modifier("orderByChild", vec![Value::String(child.to_string())])
    }

    fn order_by_key(&self) -> Result<Box<dyn Reference>> {
        self.modifier("orderByKey", Vec::new())
    }

    fn order_by_value(&self) -> Result<Box<dyn Reference>> {
        self.modifier("orderByValue", Vec::new())
    }

    fn start_at(&self, value: &Value, key: Option<&str>) -> Result<Box<dyn Reference>> {
        self.modifier("startAt", bound_args(value, key))
    }

    fn end_at(&self, value: &Value, key: Option<&str>) -> Result<Box<dyn Reference>> {
        self.modifier("endAt", bound_args(value, key))
    }

    fn equal_to(&self, value: &Value, key: Option<&str>) -> Result<Box<dyn Reference>> {
        self.modifier("equalTo", bound_args(value, key))
    }

    fn limit_to_first(&self, limit: u32) -> Result<Box<dyn Reference>> {
        self.modifier("limitToFirst", vec![Value::from(limit)])
    }

    fn limit_to_last(&self, limit: u32) -> Result<Box<dyn Reference>> {
        self.modifier("limitToLast", vec![Value::from(limit)])
    }

    fn on_value(&self, callback: ValueCallback) -> Registration {
        let id = {
            let mut next = self.store.inner.next_id.lock();
            *next += 1;
            *next
        };
        self.store.record(Call::OnValue {
            id,
            path: self.path.clone(),
        });
        self.store.inner.callbacks.lock().insert(
            id,
            Callback {
                path: self.path.clone(),
                callback: Arc::clone(&callback),
                cancelled: false,
            },
        );

        let immediate = self.store.inner.immediate.lock().get(&self.path).cloned();
        if let Some(value) = immediate {
            callback(&Snapshot::from_value(last_segment(&self.path), value));
        }

        let store = self.store.clone();
        Registration::new(move || {
            store.record(Call::Cancel { id });
            if let Some(entry) = store.inner.callbacks.lock().get_mut(&id) {
                entry.cancelled = true;
            }
        })
    }

    fn set(&self, value: Value) -> Result<()> {
        if *self.store.inner.reject_writes.lock() {
            return Err(ConnectError::Write(format!("permission denied at {}", self.path)));
        }
        self.store.record(Call::Set {
            path: self.path.clone(),
            value,
        });
        Ok(())
    }

    fn update(&self, values: Map<String, Value>) -> Result<()> {
        for (key, value) in values {
            self.child(&key).set(value)?;
        }
        Ok(())
    }

    fn push(&self, value: Value) -> Result<String> {
        if *self.store.inner.reject_writes.lock() {
            return Err(ConnectError::Write(format!("permission denied at {}", self.path)));
        }
        self.store.record(Call::Push {
            path: self.path.clone(),
            value,
        });
        Ok(format!("-{}", self.store.count(|c| matches!(c, Call::Push { .. }))))
    }
}
