//! Query modifiers and snapshot normalization.
//!
//! A query declaration is an object such as
//! `{"path": "bar", "startAt": 1, "endAt": [2, "car"]}`. Every field other
//! than `path` names a modifier; an array value is spread into positional
//! arguments, anything else is a single argument. Modifiers are parsed
//! through a fixed name table into [`QueryModifier`] values and applied to a
//! base [`Reference`] in declaration order.

use crate::error::{ConnectError, Result};
use crate::store::{Reference, Snapshot};
use serde_json::{Map, Value};

/// A single query refinement.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryModifier {
    OrderByChild(String),
    OrderByKey,
    OrderByValue,
    StartAt { value: Value, key: Option<String> },
    EndAt { value: Value, key: Option<String> },
    EqualTo { value: Value, key: Option<String> },
    LimitToFirst(u32),
    LimitToLast(u32),
}

type ParseFn = fn(&[Value]) -> std::result::Result<QueryModifier, String>;

/// Modifier name → argument parser.
const MODIFIERS: &[(&str, ParseFn)] = &[
    ("orderByChild", parse_order_by_child),
    ("orderByKey", parse_order_by_key),
    ("orderByValue", parse_order_by_value),
    ("startAt", parse_start_at),
    ("endAt", parse_end_at),
    ("equalTo", parse_equal_to),
    ("limitToFirst", parse_limit_to_first),
    ("limitToLast", parse_limit_to_last),
];

fn parse_order_by_child(args: &[Value]) -> std::result::Result<QueryModifier, String> {
    single_string(args).map(QueryModifier::OrderByChild)
}

// Key and value ordering take no arguments; `{"orderByKey": true}` is accepted.
fn parse_order_by_key(_: &[Value]) -> std::result::Result<QueryModifier, String> {
    Ok(QueryModifier::OrderByKey)
}

fn parse_order_by_value(_: &[Value]) -> std::result::Result<QueryModifier, String> {
    Ok(QueryModifier::OrderByValue)
}

fn parse_start_at(args: &[Value]) -> std::result::Result<QueryModifier, String> {
    bound(args).map(|(value, key)| QueryModifier::StartAt { value, key })
}

fn parse_end_at(args: &[Value]) -> std::result::Result<QueryModifier, String> {
    bound(args).map(|(value, key)| QueryModifier::EndAt { value, key })
}

fn parse_equal_to(args: &[Value]) -> std::result::Result<QueryModifier, String> {
    bound(args).map(|(value, key)| QueryModifier::EqualTo { value, key })
}

fn parse_limit_to_first(args: &[Value]) -> std::result::Result<QueryModifier, String> {
    limit(args).map(QueryModifier::LimitToFirst)
}

fn parse_limit_to_last(args: &[Value]) -> std::result::Result<QueryModifier, String> {
    limit(args).map(QueryModifier::LimitToLast)
}

fn single_string(args: &[Value]) -> std::result::Result<String, String> {
    match args {
        [Value::String(s)] if !s.is_empty() => Ok(s.clone()),
        _ => Err("expected a single non-empty string argument".to_string()),
    }
}

fn bound(args: &[Value]) -> std::result::Result<(Value, Option<String>), String> {
    match args {
        [value] => Ok((value.clone(), None)),
        [value, Value::String(key)] => Ok((value.clone(), Some(key.clone()))),
        [_, _] => Err("the second argument must be a key string".to_string()),
        _ => Err(format!("expected one or two arguments, got {}", args.len())),
    }
}

fn limit(args: &[Value]) -> std::result::Result<u32, String> {
    match args {
        [value] => value
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| format!("limit must be a positive integer, got {value}")),
        _ => Err(format!("expected one argument, got {}", args.len())),
    }
}

impl QueryModifier {
    /// Parse a modifier from its name and raw declaration value.
    pub fn parse(name: &str, raw: &Value) -> std::result::Result<Self, String> {
        let args: Vec<Value> = match raw {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        Self::from_call(name, &args)
    }

    /// Parse a modifier from its name and positional arguments.
    pub fn from_call(name: &str, args: &[Value]) -> std::result::Result<Self, String> {
        let (_, parse) = MODIFIERS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .ok_or_else(|| format!("unknown query modifier `{name}`"))?;
        parse(args).map_err(|reason| format!("{name}: {reason}"))
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueryModifier::OrderByChild(_) => "orderByChild",
            QueryModifier::OrderByKey => "orderByKey",
            QueryModifier::OrderByValue => "orderByValue",
            QueryModifier::StartAt { .. } => "startAt",
            QueryModifier::EndAt { .. } => "endAt",
            QueryModifier::EqualTo { .. } => "equalTo",
            QueryModifier::LimitToFirst(_) => "limitToFirst",
            QueryModifier::LimitToLast(_) => "limitToLast",
        }
    }

    /// True for the `orderBy*` family.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            QueryModifier::OrderByChild(_) | QueryModifier::OrderByKey | QueryModifier::OrderByValue
        )
    }

    /// Positional arguments, in declaration form.
    pub fn args(&self) -> Vec<Value> {
        match self {
            QueryModifier::OrderByChild(child) => vec![Value::String(child.clone())],
            QueryModifier::OrderByKey | QueryModifier::OrderByValue => Vec::new(),
            QueryModifier::StartAt { value, key }
            | QueryModifier::EndAt { value, key }
            | QueryModifier::EqualTo { value, key } => {
                let mut args = vec![value.clone()];
                args.extend(key.iter().cloned().map(Value::String));
                args
            }
            QueryModifier::LimitToFirst(n) | QueryModifier::LimitToLast(n) => vec![Value::from(*n)],
        }
    }

    /// Refine `reference` with this modifier.
    pub fn apply(&self, reference: &dyn Reference) -> Result<Box<dyn Reference>> {
        match self {
            QueryModifier::OrderByChild(child) => reference.order_by_child(child),
            QueryModifier::OrderByKey => reference.order_by_key(),
            QueryModifier::OrderByValue => reference.order_by_value(),
            QueryModifier::StartAt { value, key } => reference.start_at(value, key.as_deref()),
            QueryModifier::EndAt { value, key } => reference.end_at(value, key.as_deref()),
            QueryModifier::EqualTo { value, key } => reference.equal_to(value, key.as_deref()),
            QueryModifier::LimitToFirst(n) => reference.limit_to_first(*n),
            QueryModifier::LimitToLast(n) => reference.limit_to_last(*n),
        }
    }
}

/// A normalized subscription: a path plus its modifiers in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub path: String,
    pub modifiers: Vec<QueryModifier>,
}

impl Query {
    /// Plain path subscription.
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            modifiers: Vec::new(),
        }
    }

    pub fn with(mut self, modifier: QueryModifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Parse a `{path, ...modifiers}` object. `key` names the declaration in errors.
    pub fn from_object(key: &str, object: &Map<String, Value>) -> Result<Self> {
        let path = object
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectError::invalid_query(key, "missing string `path`"))?;

        let modifiers = object
            .iter()
            .filter(|(name, _)| name.as_str() != "path")
            .map(|(name, raw)| {
                QueryModifier::parse(name, raw).map_err(|reason| ConnectError::invalid_query(key, reason))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            path: path.to_string(),
            modifiers,
        })
    }

    /// Whether the query carries its own `orderBy*` modifier.
    pub fn is_ordered(&self) -> bool {
        self.modifiers.iter().any(QueryModifier::is_ordering)
    }

    /// Declaration form of this query.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("path".to_string(), Value::String(self.path.clone()));
        for modifier in &self.modifiers {
            let mut args = modifier.args();
            let raw = if args.len() == 1 {
                args.remove(0)
            } else {
                Value::Array(args)
            };
            object.insert(modifier.name().to_string(), raw);
        }
        Value::Object(object)
    }
}

/// Resolve-then-refine: apply `modifiers` to `base` in order.
pub fn build_query_ref(
    base: Box<dyn Reference>,
    modifiers: &[QueryModifier],
) -> Result<Box<dyn Reference>> {
    modifiers
        .iter()
        .try_fold(base, |reference, modifier| modifier.apply(reference.as_ref()))
}

/// Value delivered to a component for a snapshot.
///
/// Ordered queries keep the store's child order by rebuilding an
/// insertion-ordered object from the snapshot's children. Everything else
/// gets the plain value, `null` when the location is empty.
pub fn snapshot_value(snapshot: &Snapshot, ordered: bool) -> Value {
    if !ordered {
        return snapshot.value().clone();
    }

    let mut result = Map::new();
    snapshot.for_each_child(|key, value| {
        result.insert(key.to_string(), value.clone());
    });
    Value::Object(result)
}
