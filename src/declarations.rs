//! Declarations: what a component asks the store for.
//!
//! A [`Projection`] maps component props to a set of bindings. Each binding
//! is classified once into a [`Declaration`]:
//! - a string value is a plain path subscription (`""` is the root),
//! - an object with a non-empty string `path` is a query subscription,
//! - an action is forwarded to the component untouched,
//! - anything else is ignored.

use crate::error::{ConnectError, Result};
use crate::query::Query;
use crate::store::{RefResolver, StoreHandle};
use crate::types::{Action, Prop, Props};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Normalized subscriptions keyed by prop name.
pub type Subscriptions = BTreeMap<String, Query>;

/// A classified binding.
#[derive(Clone, Debug)]
pub enum Declaration {
    Path(String),
    Query(Query),
    Action(Action),
}

impl Declaration {
    /// Classify one projection entry. `Ok(None)` means the entry is neither
    /// a subscription nor an action.
    pub fn classify(key: &str, prop: &Prop) -> Result<Option<Self>> {
        let declaration = match prop {
            Prop::Action(action) => Some(Declaration::Action(action.clone())),
            Prop::Value(Value::String(path)) => Some(Declaration::Path(path.clone())),
            Prop::Value(Value::Object(object)) => match object.get("path") {
                Some(Value::String(path)) if !path.is_empty() => {
                    Some(Declaration::Query(Query::from_object(key, object)?))
                }
                _ => None,
            },
            _ => None,
        };
        Ok(declaration)
    }

    /// Path used for change detection; `None` for actions.
    pub fn path(&self) -> Option<&str> {
        match self {
            Declaration::Path(path) => Some(path),
            Declaration::Query(query) => Some(&query.path),
            Declaration::Action(_) => None,
        }
    }

    /// Subscription form; bare paths become queries without modifiers.
    pub fn to_query(&self) -> Option<Query> {
        match self {
            Declaration::Path(path) => Some(Query::at(path.clone())),
            Declaration::Query(query) => Some(query.clone()),
            Declaration::Action(_) => None,
        }
    }
}

/// Projection output split into subscriptions and actions.
#[derive(Clone, Debug, Default)]
pub struct DeclarationMapping {
    pub subscriptions: Subscriptions,
    pub actions: BTreeMap<String, Action>,
}

impl DeclarationMapping {
    pub fn from_props(bindings: &Props) -> Result<Self> {
        let mut mapping = DeclarationMapping::default();
        for (key, prop) in bindings {
            match Declaration::classify(key, prop)? {
                Some(Declaration::Action(action)) => {
                    mapping.actions.insert(key.clone(), action);
                }
                Some(declaration) => {
                    if let Some(query) = declaration.to_query() {
                        mapping.subscriptions.insert(key.clone(), query);
                    }
                }
                None => {}
            }
        }
        Ok(mapping)
    }
}

type BindingsFn = dyn Fn(&Props, &RefResolver, &StoreHandle) -> Props + Send + Sync;
type JsonFn = dyn Fn(&Props, &RefResolver, &StoreHandle) -> Value + Send + Sync;

/// Maps component props to bindings.
///
/// Projections are re-run on every mount, props change and render, and the
/// previous bindings are recomputed from the previous props rather than
/// cached, so a projection must be a pure function of its inputs.
#[derive(Clone)]
pub enum Projection {
    /// Returns typed bindings, actions included.
    Bindings(Arc<BindingsFn>),

    /// Returns JSON; the result must be an object.
    Json(Arc<JsonFn>),

    /// Same bindings for every props; must be an object.
    Fixed(Value),
}

impl Projection {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Props, &RefResolver, &StoreHandle) -> Props + Send + Sync + 'static,
    {
        Projection::Bindings(Arc::new(f))
    }

    pub fn json<F>(f: F) -> Self
    where
        F: Fn(&Props, &RefResolver, &StoreHandle) -> Value + Send + Sync + 'static,
    {
        Projection::Json(Arc::new(f))
    }

    pub fn fixed(bindings: Value) -> Self {
        Projection::Fixed(bindings)
    }

    /// Run the projection.
    pub fn project(&self, props: &Props, refs: &RefResolver, store: &StoreHandle) -> Result<Props> {
        match self {
            Projection::Bindings(f) => Ok(f(props, refs, store)),
            Projection::Json(f) => json_bindings(f(props, refs, store)),
            Projection::Fixed(value) => json_bindings(value.clone()),
        }
    }

    /// Run the projection and classify its output.
    pub fn declarations(
        &self,
        props: &Props,
        refs: &RefResolver,
        store: &StoreHandle,
    ) -> Result<DeclarationMapping> {
        DeclarationMapping::from_props(&self.project(props, refs, store)?)
    }
}

impl Default for Projection {
    fn default() -> Self {
        Projection::new(|_, _, _| Props::new())
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Bindings(_) => f.write_str("Projection::Bindings(..)"),
            Projection::Json(_) => f.write_str("Projection::Json(..)"),
            Projection::Fixed(value) => write!(f, "Projection::Fixed({value})"),
        }
    }
}

fn json_bindings(value: Value) -> Result<Props> {
    match value {
        Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k, Prop::Value(v))).collect()),
        other => Err(ConnectError::ContractViolation(format!(
            "projection must return a mapping, instead received {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryModifier;
    use crate::store::{MemoryStore, MemoryStoreConfig};
    use serde_json::json;

    fn store() -> StoreHandle {
        StoreHandle::new(MemoryStore::new(MemoryStoreConfig::default()))
    }

    #[test]
    fn test_classify_entries() {
        let path = Declaration::classify("foo", &Prop::from("foo")).unwrap();
        assert!(matches!(path, Some(Declaration::Path(ref p)) if p == "foo"));

        let query = Declaration::classify("bar", &Prop::from(json!({"path": "bar", "orderByKey": true})))
            .unwrap()
            .unwrap();
        assert_eq!(query.path(), Some("bar"));
        assert!(query.to_query().unwrap().is_ordered());

        let root = Declaration::classify("all", &Prop::from("")).unwrap();
        assert!(matches!(root, Some(Declaration::Path(ref p)) if p.is_empty()));

        let action = Declaration::classify("add", &Prop::from(Action::new(|_| Ok(Value::Null))))
            .unwrap()
            .unwrap();
        assert!(action.path().is_none());
        assert!(action.to_query().is_none());
    }

    #[test]
    fn test_classify_ignores_non_declarations() {
        for prop in [
            Prop::from(json!(5)),
            Prop::from(json!(null)),
            Prop::from(json!({"path": ""})),
            Prop::from(json!({"path": 3})),
            Prop::from(json!({"value": "x"})),
            Prop::Store(store()),
        ] {
            assert!(Declaration::classify("k", &prop).unwrap().is_none());
        }
    }

    #[test]
    fn test_mapping_splits_actions_and_subscriptions() {
        let mut bindings = Props::new();
        bindings.insert("foo".into(), Prop::from("foo"));
        bindings.insert("addFoo".into(), Prop::from(Action::new(|_| Ok(Value::Null))));
        bindings.insert("limit".into(), Prop::from(json!(10)));

        let mapping = DeclarationMapping::from_props(&bindings).unwrap();
        assert_eq!(mapping.subscriptions.len(), 1);
        assert_eq!(mapping.subscriptions["foo"], Query::at("foo"));
        assert!(mapping.actions.contains_key("addFoo"));
    }

    #[test]
    fn test_json_projection_must_return_object() {
        let store = store();
        let refs = RefResolver::new(store.clone());

        let projection = Projection::json(|_, _, _| json!(["foo"]));
        let err = projection.project(&Props::new(), &refs, &store).unwrap_err();
        assert!(matches!(err, ConnectError::ContractViolation(_)));
        assert!(err.to_string().contains("an array"));

        let fixed = Projection::fixed(json!({"bar": {"path": "bar", "limitToLast": 2}}));
        let mapping = fixed.declarations(&Props::new(), &refs, &store).unwrap();
        assert_eq!(
            mapping.subscriptions["bar"].modifiers,
            vec![QueryModifier::LimitToLast(2)]
        );
    }

    #[test]
    fn test_invalid_query_fails_classification() {
        let store = store();
        let refs = RefResolver::new(store.clone());
        let projection = Projection::fixed(json!({"bar": {"path": "bar", "orderByMagic": 1}}));

        let err = projection.declarations(&Props::new(), &refs, &store).unwrap_err();
        assert!(matches!(err, ConnectError::InvalidQuery { ref key, .. } if key == "bar"));
    }
}
