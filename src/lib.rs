//! # livebind
//!
//! Binds UI components to a realtime data store. A component declares, as a
//! pure function of its props, which store locations it wants to watch;
//! the connector keeps exactly those subscriptions alive and hands the
//! latest values back to the component as props.
//!
//! ## Core Concepts
//!
//! - **Projection**: props → bindings (paths, queries, actions)
//! - **Planner**: key-based diff of old and new subscriptions
//! - **Subscription manager**: live listener registry and received values
//! - **Connected component**: mount / props change / unmount state machine
//!
//! ## Example
//!
//! ```ignore
//! use livebind::{connect, Context, MemoryStore, MemoryStoreConfig, Projection, StoreHandle};
//! use serde_json::json;
//!
//! let store = MemoryStore::new(MemoryStoreConfig::default());
//! let connector = connect(Projection::json(|props, _, _| {
//!     json!({
//!         "user": format!("users/{}", props["id"].as_str().unwrap_or_default()),
//!         "latest": {"path": "messages", "orderByChild": "sent", "limitToLast": 20},
//!     })
//! }));
//!
//! let mut component = connector.bind(props, &Context::with_store(StoreHandle::new(store.clone())))?;
//! component.on_mount()?;
//! store.flush();
//! let rendered = component.render()?;
//! ```

pub mod connect;
pub mod declarations;
pub mod error;
pub mod query;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use connect::{
    connect, shallow_merge, ConnectConfig, Connected, Connector, Context, MergeProps, Phase,
};
pub use declarations::{Declaration, DeclarationMapping, Projection, Subscriptions};
pub use error::{ConnectError, Result};
pub use query::{build_query_ref, snapshot_value, Query, QueryModifier};
pub use store::{
    clear_default, default_store, initialize_default, Database, MemoryStore, MemoryStoreConfig,
    RefResolver, Reference, Registration, Snapshot, StoreHandle, ValueCallback,
};
pub use subscriptions::{
    diff, ChangeHook, Listener, SubscriptionManager, SubscriptionPlan, SubscriptionState,
};
pub use types::{props_from_json, Action, Prop, Props, STORE_PROP};
