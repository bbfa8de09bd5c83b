//! Core types shared by projections, the manager and rendered output.

use crate::error::Result;
use crate::store::StoreHandle;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Prop key under which a component may receive its store handle explicitly.
pub const STORE_PROP: &str = "store";

/// A component property.
#[derive(Clone, Debug)]
pub enum Prop {
    /// Plain data. Strings and objects with a `path` field double as
    /// subscription declarations when returned from a projection.
    Value(Value),

    /// Callable forwarded to the component verbatim.
    Action(Action),

    /// Store handle passed down explicitly.
    Store(StoreHandle),
}

impl Prop {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Prop::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match self {
            Prop::Action(action) => Some(action),
            _ => None,
        }
    }

    pub fn as_store(&self) -> Option<&StoreHandle> {
        match self {
            Prop::Store(store) => Some(store),
            _ => None,
        }
    }

    /// String content of a `Prop::Value` string.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}

impl PartialEq for Prop {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Prop::Value(a), Prop::Value(b)) => a == b,
            (Prop::Action(a), Prop::Action(b)) => a.same_action(b),
            (Prop::Store(a), Prop::Store(b)) => a.same_store(b),
            _ => false,
        }
    }
}

impl From<Value> for Prop {
    fn from(value: Value) -> Self {
        Prop::Value(value)
    }
}

impl From<&str> for Prop {
    fn from(value: &str) -> Self {
        Prop::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Prop {
    fn from(value: String) -> Self {
        Prop::Value(Value::String(value))
    }
}

impl From<Action> for Prop {
    fn from(action: Action) -> Self {
        Prop::Action(action)
    }
}

impl From<StoreHandle> for Prop {
    fn from(store: StoreHandle) -> Self {
        Prop::Store(store)
    }
}

/// A property set, keyed by prop name.
pub type Props = BTreeMap<String, Prop>;

/// Build props from a JSON object. Non-object input yields no props.
pub fn props_from_json(value: Value) -> Props {
    match value {
        Value::Object(map) => map.into_iter().map(|(k, v)| (k, Prop::Value(v))).collect(),
        _ => Props::new(),
    }
}

type ActionFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A callable binding, typically forwarding a write to the store.
#[derive(Clone)]
pub struct Action(Arc<ActionFn>);

impl Action {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.0)(args)
    }

    /// Whether both actions wrap the same callable.
    pub fn same_action(&self, other: &Action) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_props_from_json() {
        let props = props_from_json(json!({"foo": "foo prop", "n": 1}));
        assert_eq!(props.len(), 2);
        assert_eq!(props["foo"].as_str(), Some("foo prop"));
        assert!(props_from_json(json!([1, 2])).is_empty());
    }

    #[test]
    fn test_action_identity() {
        let action = Action::new(|args| Ok(json!(args.len())));
        let same = action.clone();
        let other = Action::new(|_| Ok(Value::Null));

        assert_eq!(Prop::from(action.clone()), Prop::from(same));
        assert_ne!(Prop::from(action.clone()), Prop::from(other));
        assert_eq!(action.call(&[json!(1), json!(2)]).unwrap(), json!(2));
    }
}
