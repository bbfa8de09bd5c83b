//! Store capabilities consumed by the connector.
//!
//! The connector never talks to a concrete backend. It needs a handle that
//! resolves paths to [`Reference`]s, references that can be refined with
//! query modifiers and observed with [`Reference::on_value`], and
//! [`Snapshot`]s describing what the store currently holds.
//!
//! An in-memory realtime store lives in [`memory`].
//!
//! # Example
//!
//! ```ignore
//! let store = StoreHandle::new(MemoryStore::new(MemoryStoreConfig::default()));
//!
//! let registration = store.reference("tasks").on_value(Arc::new(|snapshot| {
//!     println!("tasks = {}", snapshot.value());
//! }));
//!
//! // Later
//! registration.cancel();
//! ```

pub mod memory;

use crate::error::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub use memory::{MemoryStore, MemoryStoreConfig};

/// Callback invoked with every value emitted for a reference.
pub type ValueCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Backend capable of resolving paths to references.
pub trait Database: Send + Sync {
    /// Human-readable name of this database instance.
    fn name(&self) -> &str;

    /// Resolve a `/`-separated path to a reference.
    fn reference(&self, path: &str) -> Box<dyn Reference>;
}

/// A location in the store, optionally refined by query modifiers.
///
/// Every query method returns a new, further-refined reference and leaves
/// `self` untouched. Backends reject modifier combinations they cannot
/// serve with [`ConnectError::InvalidQuery`](crate::ConnectError::InvalidQuery).
pub trait Reference: Send + Sync {
    /// Normalized path of this reference.
    fn path(&self) -> &str;

    /// Reference to a location below this one (query modifiers are dropped).
    fn child(&self, path: &str) -> Box<dyn Reference>;

    fn order_by_child(&self, child: &str) -> Result<Box<dyn Reference>>;
    fn order_by_key(&self) -> Result<Box<dyn Reference>>;
    fn order_by_value(&self) -> Result<Box<dyn Reference>>;
    fn start_at(&self, value: &Value, key: Option<&str>) -> Result<Box<dyn Reference>>;
    fn end_at(&self, value: &Value, key: Option<&str>) -> Result<Box<dyn Reference>>;
    fn equal_to(&self, value: &Value, key: Option<&str>) -> Result<Box<dyn Reference>>;
    fn limit_to_first(&self, limit: u32) -> Result<Box<dyn Reference>>;
    fn limit_to_last(&self, limit: u32) -> Result<Box<dyn Reference>>;

    /// Observe the value at this reference.
    ///
    /// The callback fires once with the current value and again after every
    /// change, until the returned registration is cancelled.
    fn on_value(&self, callback: ValueCallback) -> Registration;

    /// Replace the value at this location. `null` deletes it.
    fn set(&self, value: Value) -> Result<()>;

    /// Set several children at once.
    fn update(&self, values: Map<String, Value>) -> Result<()>;

    /// Append a child under a generated, chronologically ordered key.
    fn push(&self, value: Value) -> Result<String>;

    /// Delete the value at this location.
    fn remove(&self) -> Result<()> {
        self.set(Value::Null)
    }
}

/// Live registration of a value callback.
///
/// Dropping a registration does NOT cancel it; call [`Registration::cancel`].
pub struct Registration {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Registration with nothing to release.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Release the underlying store registration.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Immutable view of the data at a reference at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    key: Option<String>,
    value: Value,
    /// Children in the order the store serves them (query order).
    children: Vec<(String, Value)>,
}

impl Snapshot {
    pub fn new(key: Option<String>, value: Value, children: Vec<(String, Value)>) -> Self {
        Self {
            key,
            value,
            children,
        }
    }

    /// Snapshot whose children are the entries of `value` in their own order.
    pub fn from_value(key: Option<String>, value: Value) -> Self {
        let children = match &value {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        };
        Self::new(key, value, children)
    }

    /// Last path segment of the location, `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Materialized value, `null` when the location holds no data.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Visit children in the order the store provides them.
    pub fn for_each_child(&self, mut f: impl FnMut(&str, &Value)) {
        for (key, value) in &self.children {
            f(key, value);
        }
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Shared handle to a database.
///
/// Cloning is cheap; all clones point at the same backend.
#[derive(Clone)]
pub struct StoreHandle(Arc<dyn Database>);

impl StoreHandle {
    pub fn new(database: impl Database + 'static) -> Self {
        Self(Arc::new(database))
    }

    pub fn from_arc(database: Arc<dyn Database>) -> Self {
        Self(database)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn reference(&self, path: &str) -> Box<dyn Reference> {
        self.0.reference(path)
    }

    /// Whether both handles point at the same backend.
    pub fn same_store(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreHandle({})", self.name())
    }
}

/// Resolves paths to references on one store; handed to projections.
#[derive(Clone, Debug)]
pub struct RefResolver {
    store: StoreHandle,
}

impl RefResolver {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub fn resolve(&self, path: &str) -> Box<dyn Reference> {
        self.store.reference(path)
    }
}

static DEFAULT_STORE: RwLock<Option<StoreHandle>> = RwLock::new(None);

/// Install the ambient store used when a component finds no other handle.
///
/// Returns the previously installed store, if any.
pub fn initialize_default(store: StoreHandle) -> Option<StoreHandle> {
    tracing::debug!(store = store.name(), "initializing default store");
    DEFAULT_STORE.write().replace(store)
}

/// The ambient store, if one was initialized.
pub fn default_store() -> Option<StoreHandle> {
    DEFAULT_STORE.read().clone()
}

/// Remove the ambient store.
pub fn clear_default() -> Option<StoreHandle> {
    DEFAULT_STORE.write().take()
}
