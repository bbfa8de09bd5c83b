//! Binding components to the store.
//!
//! [`connect`] builds a [`Connector`] from a projection. Binding it to a set
//! of props yields a [`Connected`] component, driven by the surrounding UI
//! through three lifecycle events:
//!
//! ```text
//! Initial --on_mount--> Active --on_props_changed--> Active
//!                          |
//!                          +------on_unmount------> Terminated
//! ```
//!
//! `render` produces the props for the wrapped component: the incoming props
//! merged with the projection's actions and the latest subscription values.

use crate::declarations::{DeclarationMapping, Projection};
use crate::error::{ConnectError, Result};
use crate::store::{default_store, RefResolver, StoreHandle};
use crate::subscriptions::{
    diff, ChangeHook, Listener, SubscriptionManager, SubscriptionState,
};
use crate::types::{Prop, Props, STORE_PROP};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Name used when a connector is not named explicitly.
pub const DEFAULT_COMPONENT_NAME: &str = "Component";

type MergeFn = dyn Fn(&Props, &Props) -> Props + Send + Sync;

/// Combines a component's own props with its store-derived props.
#[derive(Clone)]
pub struct MergeProps(Arc<MergeFn>);

impl MergeProps {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Props, &Props) -> Props + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn merge(&self, own: &Props, bound: &Props) -> Props {
        (self.0)(own, bound)
    }
}

impl Default for MergeProps {
    fn default() -> Self {
        MergeProps::new(shallow_merge)
    }
}

impl fmt::Debug for MergeProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MergeProps(..)")
    }
}

/// Own props overlaid with bound props; bound entries win.
pub fn shallow_merge(own: &Props, bound: &Props) -> Props {
    let mut merged = own.clone();
    merged.extend(bound.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Inherited context: what an enclosing provider hands down.
#[derive(Clone, Debug, Default)]
pub struct Context {
    pub store: Option<StoreHandle>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: StoreHandle) -> Self {
        Self { store: Some(store) }
    }
}

/// Connector configuration.
#[derive(Clone, Debug)]
pub struct ConnectConfig {
    /// Name used in logs and [`Connected::display_name`].
    pub name: String,

    /// Maps props to subscriptions and actions.
    pub projection: Projection,

    /// Combines own props with bound props.
    pub merge: MergeProps,

    /// Store bound at connect time; overridden by a `store` prop.
    pub store: Option<StoreHandle>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COMPONENT_NAME.to_string(),
            projection: Projection::default(),
            merge: MergeProps::default(),
            store: None,
        }
    }
}

/// Create a connector for `projection` with the default merge policy.
pub fn connect(projection: Projection) -> Connector {
    Connector::new(ConnectConfig {
        projection,
        ..Default::default()
    })
}

/// Factory for connected components sharing one configuration.
#[derive(Clone, Debug)]
pub struct Connector {
    config: ConnectConfig,
}

impl Connector {
    pub fn new(config: ConnectConfig) -> Self {
        Self { config }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Replace the merge policy entirely.
    pub fn merge_props<F>(mut self, f: F) -> Self
    where
        F: Fn(&Props, &Props) -> Props + Send + Sync + 'static,
    {
        self.config.merge = MergeProps::new(f);
        self
    }

    pub fn with_store(mut self, store: StoreHandle) -> Self {
        self.config.store = Some(store);
        self
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Bind a component occurrence to its initial props.
    ///
    /// Fails with [`ConnectError::NoStore`] when neither the props, the
    /// connector, the context nor the ambient default provide a store.
    pub fn bind(&self, props: Props, context: &Context) -> Result<Connected> {
        let store = resolve_store(&props, &self.config, context)?;
        debug!(component = %self.config.name, store = store.name(), "binding component");

        Ok(Connected {
            name: self.config.name.clone(),
            projection: self.config.projection.clone(),
            merge: self.config.merge.clone(),
            refs: RefResolver::new(store.clone()),
            manager: SubscriptionManager::new(store.clone()),
            store,
            props,
            phase: Phase::Initial,
        })
    }
}

fn resolve_store(props: &Props, config: &ConnectConfig, context: &Context) -> Result<StoreHandle> {
    props
        .get(STORE_PROP)
        .and_then(Prop::as_store)
        .cloned()
        .or_else(|| config.store.clone())
        .or_else(|| context.store.clone())
        .or_else(default_store)
        .ok_or(ConnectError::NoStore)
}

/// Lifecycle phase of a connected component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Initial,
    Active,
    Terminated,
}

/// One mounted occurrence of a connected component.
pub struct Connected {
    name: String,
    projection: Projection,
    merge: MergeProps,
    store: StoreHandle,
    refs: RefResolver,
    props: Props,
    phase: Phase,
    manager: SubscriptionManager,
}

impl Connected {
    /// Subscribe to everything the current props declare.
    pub fn on_mount(&mut self) -> Result<()> {
        if self.phase != Phase::Initial {
            return Err(ConnectError::InvalidLifecycle(format!(
                "{} cannot mount while {:?}",
                self.display_name(),
                self.phase
            )));
        }

        let mapping = self.declarations(&self.props)?;
        self.manager.mount();
        if let Err(e) = self.manager.subscribe(&mapping.subscriptions) {
            self.manager.unmount();
            return Err(e);
        }

        self.phase = Phase::Active;
        debug!(
            component = %self.name,
            subscriptions = mapping.subscriptions.len(),
            "mounted"
        );
        Ok(())
    }

    /// Reconcile subscriptions with a new set of props.
    pub fn on_props_changed(&mut self, next: Props) -> Result<()> {
        match self.phase {
            Phase::Initial => {
                self.props = next;
                Ok(())
            }
            Phase::Terminated => {
                debug!(component = %self.name, "ignoring props change after unmount");
                Ok(())
            }
            Phase::Active => {
                let previous = self.declarations(&self.props)?;
                let upcoming = self.declarations(&next)?;
                let plan = diff(&previous.subscriptions, &upcoming.subscriptions);

                if !plan.is_empty() {
                    debug!(
                        component = %self.name,
                        added = plan.added.len(),
                        removed = plan.removed.len(),
                        changed = plan.changed.len(),
                        "reconciling subscriptions"
                    );
                    // Props are kept only once applied, so a rejected change
                    // is diffed again on the next update.
                    self.manager.apply(&plan)?;
                }
                self.props = next;
                Ok(())
            }
        }
    }

    /// Release every listener. Later store values are ignored.
    pub fn on_unmount(&mut self) {
        if self.phase == Phase::Terminated {
            return;
        }
        self.manager.unmount();
        self.phase = Phase::Terminated;
        debug!(component = %self.name, "unmounted");
    }

    /// Props for the wrapped component.
    pub fn render(&self) -> Result<Props> {
        let mapping = self.declarations(&self.props)?;

        let mut bound: Props = mapping
            .actions
            .into_iter()
            .map(|(key, action)| (key, Prop::Action(action)))
            .collect();
        for (key, value) in self.manager.state().into_inner() {
            bound.insert(key, Prop::Value(value));
        }

        Ok(self.merge.merge(&self.props, &bound))
    }

    /// Install the hook the UI uses to schedule a re-render.
    pub fn set_change_hook<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let hook: ChangeHook = Arc::new(hook);
        self.manager.set_change_hook(hook);
    }

    fn declarations(&self, props: &Props) -> Result<DeclarationMapping> {
        self.projection.declarations(props, &self.refs, &self.store)
    }

    pub fn display_name(&self) -> String {
        format!("Connected({})", self.name)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.manager.state()
    }

    pub fn listener(&self, key: &str) -> Option<&Listener> {
        self.manager.listener(key)
    }

    /// Registered path per subscribed key.
    pub fn listener_paths(&self) -> BTreeMap<String, String> {
        self.manager.listener_paths()
    }
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("store", &self.store)
            .field("listeners", &self.manager.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MemoryStoreConfig};
    use crate::types::{props_from_json, Action};
    use serde_json::{json, Value};

    fn memory(data: Value) -> MemoryStore {
        MemoryStore::with_data(MemoryStoreConfig::default(), data)
    }

    #[test]
    fn test_shallow_merge_prefers_bound() {
        let own = props_from_json(json!({"foo": "own", "keep": 1}));
        let bound = props_from_json(json!({"foo": "bound"}));
        let merged = shallow_merge(&own, &bound);

        assert_eq!(merged["foo"].as_str(), Some("bound"));
        assert_eq!(merged["keep"], Prop::from(json!(1)));
    }

    #[test]
    fn test_store_prop_wins_over_context() {
        let from_prop = StoreHandle::new(memory(Value::Null));
        let from_context = StoreHandle::new(memory(Value::Null));

        let mut props = Props::new();
        props.insert(STORE_PROP.into(), Prop::Store(from_prop.clone()));
        let connected = connect(Projection::default())
            .bind(props, &Context::with_store(from_context.clone()))
            .unwrap();
        assert!(connected.store().same_store(&from_prop));

        let connected = connect(Projection::default())
            .bind(Props::new(), &Context::with_store(from_context.clone()))
            .unwrap();
        assert!(connected.store().same_store(&from_context));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let store = memory(json!({"foo": 1}));
        let mut connected = connect(Projection::fixed(json!({"foo": "foo"})))
            .named("Counter")
            .with_store(StoreHandle::new(store.clone()))
            .bind(Props::new(), &Context::new())
            .unwrap();

        assert_eq!(connected.phase(), Phase::Initial);
        assert_eq!(connected.display_name(), "Connected(Counter)");

        connected.on_mount().unwrap();
        assert_eq!(connected.phase(), Phase::Active);
        assert!(matches!(
            connected.on_mount(),
            Err(ConnectError::InvalidLifecycle(_))
        ));

        connected.on_unmount();
        connected.on_unmount();
        assert_eq!(connected.phase(), Phase::Terminated);
        assert_eq!(store.listener_count(), 0);

        connected.on_props_changed(Props::new()).unwrap();
        assert!(connected.listener_paths().is_empty());
    }

    #[test]
    fn test_render_includes_actions_and_values() {
        let store = memory(json!({"todos": {"a": "milk"}}));
        let projection = Projection::new(|_, refs, _| {
            let todos = refs.resolve("todos");
            let mut bindings = Props::new();
            bindings.insert("todos".into(), Prop::from("todos"));
            bindings.insert(
                "addTodo".into(),
                Prop::from(Action::new(move |args| {
                    let item = args.first().cloned().unwrap_or(Value::Null);
                    todos.push(item).map(Value::String)
                })),
            );
            bindings
        });

        let mut connected = connect(projection)
            .with_store(StoreHandle::new(store.clone()))
            .bind(Props::new(), &Context::new())
            .unwrap();
        connected.on_mount().unwrap();
        store.flush();

        let props = connected.render().unwrap();
        assert_eq!(props["todos"], Prop::from(json!({"a": "milk"})));

        let add = props["addTodo"].as_action().unwrap();
        add.call(&[json!("eggs")]).unwrap();
        store.flush();

        let props = connected.render().unwrap();
        let todos = props["todos"].as_value().unwrap().as_object().unwrap();
        assert_eq!(todos.len(), 2);
    }
}
