//! In-memory realtime store.
//!
//! Holds a JSON tree addressed by `/`-separated paths and serves value
//! listeners the way a realtime backend does: an initial snapshot on
//! registration, then a fresh snapshot whenever the visible result of the
//! listener's query changes.
//!
//! Notifications are queued on a channel and delivered by [`MemoryStore::flush`],
//! which models a store that calls back asynchronously. With
//! `immediate_delivery` the queue is drained at the end of every write and
//! registration instead.

use super::{Database, Reference, Registration, Snapshot, ValueCallback};
use crate::error::{ConnectError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Name given to stores that were not named explicitly.
pub const DEFAULT_STORE_NAME: &str = "[DEFAULT]";

/// Memory store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Name reported through [`Database::name`].
    pub name: String,

    /// Deliver notifications as soon as they are produced instead of
    /// waiting for [`MemoryStore::flush`].
    /// Default: false
    pub immediate_delivery: bool,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_STORE_NAME.to_string(),
            immediate_delivery: false,
        }
    }
}

/// How children are ordered by a query.
#[derive(Clone, Debug, PartialEq)]
enum OrderBy {
    Key,
    Value,
    Child(Vec<String>),
}

/// One side of a range filter.
#[derive(Clone, Debug, PartialEq)]
struct Bound {
    value: Value,
    key: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Limit {
    First(u32),
    Last(u32),
}

/// Query state accumulated on a reference.
#[derive(Clone, Debug, Default, PartialEq)]
struct QuerySpec {
    order: Option<OrderBy>,
    start: Option<Bound>,
    end: Option<Bound>,
    equal: bool,
    limit: Option<Limit>,
}

impl QuerySpec {
    fn is_default(&self) -> bool {
        *self == QuerySpec::default()
    }

    fn order(&self) -> &OrderBy {
        self.order.as_ref().unwrap_or(&OrderBy::Key)
    }

    fn with_order(&self, path: &str, order: OrderBy) -> Result<Self> {
        if self.order.is_some() {
            return Err(ConnectError::invalid_query(
                path,
                "an orderBy modifier was already applied",
            ));
        }
        let mut next = self.clone();
        next.order = Some(order);
        next.check_key_bounds(path)?;
        Ok(next)
    }

    fn with_start(&self, path: &str, bound: Bound) -> Result<Self> {
        if self.start.is_some() || self.equal {
            return Err(ConnectError::invalid_query(
                path,
                "a start bound was already set",
            ));
        }
        let mut next = self.clone();
        next.start = Some(bound);
        next.check_key_bounds(path)?;
        Ok(next)
    }

    fn with_end(&self, path: &str, bound: Bound) -> Result<Self> {
        if self.end.is_some() || self.equal {
            return Err(ConnectError::invalid_query(path, "an end bound was already set"));
        }
        let mut next = self.clone();
        next.end = Some(bound);
        next.check_key_bounds(path)?;
        Ok(next)
    }

    fn with_equal(&self, path: &str, bound: Bound) -> Result<Self> {
        if self.start.is_some() || self.end.is_some() || self.equal {
            return Err(ConnectError::invalid_query(
                path,
                "equalTo cannot be combined with startAt, endAt or another equalTo",
            ));
        }
        let mut next = self.clone();
        next.start = Some(bound.clone());
        next.end = Some(bound);
        next.equal = true;
        next.check_key_bounds(path)?;
        Ok(next)
    }

    fn with_limit(&self, path: &str, limit: Limit) -> Result<Self> {
        if self.limit.is_some() {
            return Err(ConnectError::invalid_query(path, "a limit was already set"));
        }
        let mut next = self.clone();
        next.limit = Some(limit);
        Ok(next)
    }

    /// Key ordering only accepts string bounds without a key tiebreak.
    fn check_key_bounds(&self, path: &str) -> Result<()> {
        if self.order != Some(OrderBy::Key) {
            return Ok(());
        }
        for bound in self.start.iter().chain(self.end.iter()) {
            if !bound.value.is_string() || bound.key.is_some() {
                return Err(ConnectError::invalid_query(
                    path,
                    "orderByKey bounds must be a single string",
                ));
            }
        }
        Ok(())
    }
}

/// A registered value listener.
struct Watcher {
    path: Vec<String>,
    query: QuerySpec,
    callback: ValueCallback,
    /// Last snapshot queued for this watcher.
    last: Option<Snapshot>,
}

/// A queued notification.
struct Delivery {
    watcher: u64,
    snapshot: Snapshot,
}

struct Inner {
    name: String,
    immediate: bool,
    data: RwLock<Value>,
    watchers: Mutex<HashMap<u64, Watcher>>,
    next_watcher: AtomicU64,
    next_push: AtomicU64,
    queue_tx: Sender<Delivery>,
    queue_rx: Receiver<Delivery>,
}

/// In-memory realtime store.
///
/// Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self::with_data(config, Value::Null)
    }

    /// Create a store seeded with `data` at the root.
    pub fn with_data(config: MemoryStoreConfig, data: Value) -> Self {
        let (queue_tx, queue_rx) = unbounded();
        Self {
            inner: Arc::new(Inner {
                name: config.name,
                immediate: config.immediate_delivery,
                data: RwLock::new(normalize(data).unwrap_or(Value::Null)),
                watchers: Mutex::new(HashMap::new()),
                next_watcher: AtomicU64::new(1),
                next_push: AtomicU64::new(1),
                queue_tx,
                queue_rx,
            }),
        }
    }

    /// Replace the value at `path` with JSON text.
    pub fn load_json(&self, path: &str, text: &str) -> Result<()> {
        let value: Value = serde_json::from_str(text)?;
        self.inner.apply(vec![(split_path(path), normalize(value))]);
        Ok(())
    }

    /// Current value at `path`, `null` when absent.
    pub fn get(&self, path: &str) -> Value {
        let data = self.inner.data.read();
        lookup(&data, &split_path(path)).cloned().unwrap_or(Value::Null)
    }

    /// Copy of the whole tree.
    pub fn export(&self) -> Value {
        self.inner.data.read().clone()
    }

    /// Deliver every queued notification. Returns how many callbacks ran.
    pub fn flush(&self) -> usize {
        self.inner.flush()
    }

    /// Number of queued notifications.
    pub fn pending(&self) -> usize {
        self.inner.queue_rx.len()
    }

    /// Number of live value listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }
}

impl Database for MemoryStore {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn reference(&self, path: &str) -> Box<dyn Reference> {
        Box::new(MemoryRef::new(Arc::clone(&self.inner), split_path(path)))
    }
}

impl Inner {
    /// Apply writes atomically and queue notifications for affected watchers.
    fn apply(self: &Arc<Self>, writes: Vec<(Vec<String>, Option<Value>)>) {
        {
            let mut data = self.data.write();
            for (path, value) in &writes {
                write_node(&mut data, path, value.clone());
            }
            let data = RwLockWriteGuard::downgrade(data);

            let mut watchers = self.watchers.lock();
            for (id, watcher) in watchers.iter_mut() {
                let affected = writes
                    .iter()
                    .any(|(path, _)| is_prefix(path, &watcher.path) || is_prefix(&watcher.path, path));
                if !affected {
                    continue;
                }
                let snapshot = evaluate(&data, &watcher.path, &watcher.query);
                if watcher.last.as_ref() == Some(&snapshot) {
                    continue;
                }
                watcher.last = Some(snapshot.clone());
                self.enqueue(*id, snapshot);
            }
        }

        if self.immediate {
            self.flush();
        }
    }

    fn register(self: &Arc<Self>, path: Vec<String>, query: QuerySpec, callback: ValueCallback) -> u64 {
        let id = self.next_watcher.fetch_add(1, AtomicOrdering::SeqCst);
        {
            let data = self.data.read();
            let snapshot = evaluate(&data, &path, &query);
            let mut watchers = self.watchers.lock();
            debug!(store = %self.name, path = %join_path(&path), watcher = id, "registering value listener");
            watchers.insert(
                id,
                Watcher {
                    path,
                    query,
                    callback,
                    last: Some(snapshot.clone()),
                },
            );
            self.enqueue(id, snapshot);
        }

        if self.immediate {
            self.flush();
        }
        id
    }

    fn unregister(&self, id: u64) {
        if self.watchers.lock().remove(&id).is_some() {
            debug!(store = %self.name, watcher = id, "value listener cancelled");
        }
    }

    fn enqueue(&self, watcher: u64, snapshot: Snapshot) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.queue_tx.send(Delivery { watcher, snapshot });
    }

    fn flush(&self) -> usize {
        let mut delivered = 0;
        while let Ok(delivery) = self.queue_rx.try_recv() {
            // Look the callback up at delivery time: cancelled watchers get nothing.
            let callback = self
                .watchers
                .lock()
                .get(&delivery.watcher)
                .map(|w| Arc::clone(&w.callback));
            match callback {
                Some(callback) => {
                    trace!(watcher = delivery.watcher, "delivering snapshot");
                    callback(&delivery.snapshot);
                    delivered += 1;
                }
                None => trace!(watcher = delivery.watcher, "dropping snapshot for cancelled listener"),
            }
        }
        delivered
    }

    fn next_push_key(&self) -> String {
        format!("-{:019}", self.next_push.fetch_add(1, AtomicOrdering::SeqCst))
    }
}

/// Reference into a [`MemoryStore`].
struct MemoryRef {
    inner: Arc<Inner>,
    path: Vec<String>,
    display: String,
    query: QuerySpec,
}

impl MemoryRef {
    fn new(inner: Arc<Inner>, path: Vec<String>) -> Self {
        let display = join_path(&path);
        Self {
            inner,
            path,
            display,
            query: QuerySpec::default(),
        }
    }

    fn refine(&self, query: QuerySpec) -> Box<dyn Reference> {
        Box::new(MemoryRef {
            inner: Arc::clone(&self.inner),
            path: self.path.clone(),
            display: self.display.clone(),
            query,
        })
    }

    fn child_path(&self, path: &str) -> Vec<String> {
        let mut full = self.path.clone();
        full.extend(split_path(path));
        full
    }
}

impl Reference for MemoryRef {
    fn path(&self) -> &str {
        &self.display
    }

    fn child(&self, path: &str) -> Box<dyn Reference> {
        Box::new(MemoryRef::new(Arc::clone(&self.inner), self.child_path(path)))
    }

    fn order_by_child(&self, child: &str) -> Result<Box<dyn Reference>> {
        let child = split_path(child);
        if child.is_empty() {
            return Err(ConnectError::invalid_query(
                &self.display,
                "orderByChild needs a non-empty child path",
            ));
        }
        Ok(self.refine(self.query.with_order(&self.display, OrderBy::Child(child))?))
    }

    fn order_by_key(&self) -> Result<Box<dyn Reference>> {
        Ok(self.refine(self.query.with_order(&self.display, OrderBy::Key)?))
    }

    fn order_by_value(&self) -> Result<Box<dyn Reference>> {
        Ok(self.refine(self.query.with_order(&self.display, OrderBy::Value)?))
    }

    fn start_at(&self, value: &Value, key: Option<&str>) -> Result<Box<dyn Reference>> {
        let bound = Bound {
            value: value.clone(),
            key: key.map(str::to_string),
        };
        Ok(self.refine(self.query.with_start(&self.display, bound)?))
    }

    fn end_at(&self, value: &Value, key: Option<&str>) -> Result<Box<dyn Reference>> {
        let bound = Bound {
            value: value.clone(),
            key: key.map(str::to_string),
        };
        Ok(self.refine(self.query.with_end(&self.display, bound)?))
    }

    fn equal_to(&self, value: &Value, key: Option<&str>) -> Result<Box<dyn Reference>> {
        let bound = Bound {
            value: value.clone(),
            key: key.map(str::to_string),
        };
        Ok(self.refine(self.query.with_equal(&self.display, bound)?))
    }

    fn limit_to_first(&self, limit: u32) -> Result<Box<dyn Reference>> {
        Ok(self.refine(self.query.with_limit(&self.display, Limit::First(limit))?))
    }

    fn limit_to_last(&self, limit: u32) -> Result<Box<dyn Reference>> {
        Ok(self.refine(self.query.with_limit(&self.display, Limit::Last(limit))?))
    }

    fn on_value(&self, callback: ValueCallback) -> Registration {
        let id = self
            .inner
            .register(self.path.clone(), self.query.clone(), callback);
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Registration::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.unregister(id);
            }
        })
    }

    fn set(&self, value: Value) -> Result<()> {
        self.inner.apply(vec![(self.path.clone(), normalize(value))]);
        Ok(())
    }

    fn update(&self, values: Map<String, Value>) -> Result<()> {
        let writes = values
            .into_iter()
            .map(|(key, value)| {
                let path = self.child_path(&key);
                if path.len() == self.path.len() {
                    return Err(ConnectError::Write(format!(
                        "update key `{key}` does not name a child of `{}`",
                        self.display
                    )));
                }
                Ok((path, normalize(value)))
            })
            .collect::<Result<Vec<_>>>()?;
        if !writes.is_empty() {
            self.inner.apply(writes);
        }
        Ok(())
    }

    fn push(&self, value: Value) -> Result<String> {
        let key = self.inner.next_push_key();
        let mut path = self.path.clone();
        path.push(key.clone());
        self.inner.apply(vec![(path, normalize(value))]);
        Ok(key)
    }
}

// --- Tree helpers ---

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_path(path: &[String]) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.join("/")
    }
}

fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| a == b)
}

/// Convert a written value to stored form: no nulls, no empty objects,
/// arrays become objects keyed by index.
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(items) => {
            let map: Map<String, Value> = items
                .into_iter()
                .enumerate()
                .filter_map(|(i, item)| normalize(item).map(|v| (i.to_string(), v)))
                .collect();
            (!map.is_empty()).then_some(Value::Object(map))
        }
        Value::Object(entries) => {
            let map: Map<String, Value> = entries
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            (!map.is_empty()).then_some(Value::Object(map))
        }
        other => Some(other),
    }
}

fn write_node(node: &mut Value, path: &[String], value: Option<Value>) {
    let Some((head, rest)) = path.split_first() else {
        *node = value.unwrap_or(Value::Null);
        return;
    };

    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    let now_empty = match node {
        Value::Object(map) => {
            let child = map.entry(head.clone()).or_insert(Value::Null);
            write_node(child, rest, value);
            if child.is_null() {
                map.remove(head);
            }
            map.is_empty()
        }
        _ => false,
    };
    if now_empty {
        *node = Value::Null;
    }
}

fn lookup<'a>(node: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(node, |node, segment| node.get(segment.as_str()))
        .filter(|value| !value.is_null())
}

/// Build the snapshot a watcher sees.
fn evaluate(data: &Value, path: &[String], query: &QuerySpec) -> Snapshot {
    let key = path.last().cloned();
    let Some(node) = lookup(data, path) else {
        return Snapshot::new(key, Value::Null, Vec::new());
    };
    let Value::Object(map) = node else {
        return Snapshot::new(key, node.clone(), Vec::new());
    };

    let order = query.order();
    let mut children: Vec<(&String, &Value)> = map.iter().collect();
    children.sort_by(|a, b| compare_children(order, a, b));
    children.retain(|child| {
        let after_start = query
            .start
            .as_ref()
            .map_or(true, |bound| compare_to_bound(order, *child, bound) != Ordering::Less);
        let before_end = query
            .end
            .as_ref()
            .map_or(true, |bound| compare_to_bound(order, *child, bound) != Ordering::Greater);
        after_start && before_end
    });
    match query.limit {
        Some(Limit::First(n)) => children.truncate(n as usize),
        Some(Limit::Last(n)) => {
            let skip = children.len().saturating_sub(n as usize);
            children.drain(..skip);
        }
        None => {}
    }

    let children: Vec<(String, Value)> = children
        .into_iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    // The materialized value is always in key order, whatever the query order.
    let mut by_key: Vec<&(String, Value)> = children.iter().collect();
    if !query.is_default() {
        by_key.sort_by(|a, b| compare_keys(&a.0, &b.0));
    }
    let value: Map<String, Value> = by_key.into_iter().cloned().collect();
    let value = if value.is_empty() {
        Value::Null
    } else {
        Value::Object(value)
    };

    Snapshot::new(key, value, children)
}

fn order_value(order: &OrderBy, key: &str, value: &Value) -> Value {
    match order {
        OrderBy::Key => Value::String(key.to_string()),
        OrderBy::Value => value.clone(),
        OrderBy::Child(path) => lookup(value, path).cloned().unwrap_or(Value::Null),
    }
}

fn compare_children(order: &OrderBy, a: &(&String, &Value), b: &(&String, &Value)) -> Ordering {
    match order {
        OrderBy::Key => compare_keys(a.0, b.0),
        _ => compare_values(&order_value(order, a.0, a.1), &order_value(order, b.0, b.1))
            .then_with(|| compare_keys(a.0, b.0)),
    }
}

fn compare_to_bound(order: &OrderBy, child: (&String, &Value), bound: &Bound) -> Ordering {
    match order {
        OrderBy::Key => compare_keys(child.0, bound.value.as_str().unwrap_or_default()),
        _ => compare_values(&order_value(order, child.0, child.1), &bound.value).then_with(|| {
            bound
                .key
                .as_deref()
                .map_or(Ordering::Equal, |key| compare_keys(child.0, key))
        }),
    }
}

/// Integer-like keys first in numeric order, then everything else lexically.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (integer_key(a), integer_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn integer_key(key: &str) -> Option<i64> {
    key.parse::<i64>().ok().filter(|n| n.to_string() == key)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) | Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    type_rank(a).cmp(&type_rank(b)).then_with(|| match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    })
}
