//! Conversation state and per-field merge policies
//!
//! A [`State`] is a schema-less JSON object. Every field has a declared
//! [`MergePolicy`] (or a custom [`Reducer`]) that decides how a node's delta is
//! folded into the current value. Fields without a declaration are replaced.
//!
//! ```rust
//! use serde_json::json;
//! use threadgraph_checkpoint::{MergePolicy, State, StateSchema};
//!
//! let schema = StateSchema::conversation().with_policy("message_count", MergePolicy::Sum);
//!
//! let mut state = State::new()
//!     .with("messages", json!([{"role": "human", "content": "hi"}]))
//!     .with("message_count", json!(1));
//! let delta = State::new()
//!     .with("messages", json!([{"role": "assistant", "content": "hello"}]))
//!     .with("message_count", json!(1));
//!
//! schema.apply(&mut state, &delta).unwrap();
//! assert_eq!(state.message_count(), 2);
//! assert_eq!(state.get("message_count"), Some(&json!(2)));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Field holding the conversation transcript.
pub const MESSAGES: &str = "messages";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("State must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("Cannot merge field '{field}' with '{policy}' policy: {reason}")]
    Merge {
        field: String,
        policy: String,
        reason: String,
    },

    #[error("Field '{0}' is managed by the engine and cannot be supplied as input")]
    ReservedField(String),
}

impl StateError {
    fn merge(field: &str, policy: &str, reason: impl Into<String>) -> Self {
        Self::Merge {
            field: field.to_string(),
            policy: policy.to_string(),
            reason: reason.into(),
        }
    }
}

/// Mapping from field name to value carried between steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Map<String, Value>);

impl State {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value, rejecting anything that is not an object.
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(StateError::NotAnObject(json_kind(&other).to_string())),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// True when the field exists and is not `null`.
    pub fn is_set(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.insert(field, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Raw message records, empty when the field is absent or malformed.
    pub fn messages(&self) -> &[Value] {
        match self.0.get(MESSAGES) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages().len()
    }
}

impl From<Map<String, Value>> for State {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for State {
    type Error = StateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<State> for Value {
    fn from(state: State) -> Self {
        state.into_value()
    }
}

/// Folds an update into the current value of one field.
///
/// `current` is `Value::Null` when the field is not present yet.
pub trait Reducer: Send + Sync {
    fn reduce(&self, field: &str, current: &Value, update: &Value) -> Result<Value, StateError>;

    fn name(&self) -> &str;
}

/// Built-in merge policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// New value overwrites the old one (`null` clears the field)
    Replace,
    /// Sequence elements are concatenated onto the existing sequence
    Append,
    /// Object keys are merged, update wins on conflict
    Merge,
    /// Numbers are added
    Sum,
}

impl Reducer for MergePolicy {
    fn reduce(&self, field: &str, current: &Value, update: &Value) -> Result<Value, StateError> {
        match self {
            MergePolicy::Replace => Ok(update.clone()),
            MergePolicy::Append => append(field, current, update),
            MergePolicy::Merge => merge_objects(field, current, update),
            MergePolicy::Sum => sum(field, current, update),
        }
    }

    fn name(&self) -> &str {
        match self {
            MergePolicy::Replace => "replace",
            MergePolicy::Append => "append",
            MergePolicy::Merge => "merge",
            MergePolicy::Sum => "sum",
        }
    }
}

fn append(field: &str, current: &Value, update: &Value) -> Result<Value, StateError> {
    let mut items = match current {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => {
            return Err(StateError::merge(
                field,
                "append",
                format!("current value is {}", json_kind(other)),
            ))
        }
    };
    match update {
        Value::Array(more) => items.extend_from_slice(more),
        Value::Null => {}
        single => items.push(single.clone()),
    }
    Ok(Value::Array(items))
}

fn merge_objects(field: &str, current: &Value, update: &Value) -> Result<Value, StateError> {
    match (current, update) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged = base.clone();
            for (key, value) in patch {
                merged.insert(key.clone(), value.clone());
            }
            Ok(Value::Object(merged))
        }
        (Value::Null, Value::Object(patch)) => Ok(Value::Object(patch.clone())),
        (_, Value::Null) => Ok(current.clone()),
        (current, update) => Err(StateError::merge(
            field,
            "merge",
            format!("cannot merge {} into {}", json_kind(update), json_kind(current)),
        )),
    }
}

fn sum(field: &str, current: &Value, update: &Value) -> Result<Value, StateError> {
    match (current, update) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Ok(Value::from(a.saturating_add(b)));
            }
            let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                return Err(StateError::merge(field, "sum", "non-finite operand"));
            };
            serde_json::Number::from_f64(a + b)
                .map(Value::Number)
                .ok_or_else(|| StateError::merge(field, "sum", "result is not finite"))
        }
        (Value::Null, Value::Number(_)) => Ok(update.clone()),
        (current, update) => Err(StateError::merge(
            field,
            "sum",
            format!("cannot add {} to {}", json_kind(update), json_kind(current)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Per-field merge declarations for a graph's state.
#[derive(Clone)]
pub struct StateSchema {
    fields: HashMap<String, Arc<dyn Reducer>>,
    default_reducer: Arc<dyn Reducer>,
}

impl StateSchema {
    /// Empty schema: every field is replaced.
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
            default_reducer: Arc::new(MergePolicy::Replace),
        }
    }

    /// Schema with `messages` declared append-only.
    pub fn conversation() -> Self {
        Self::new().with_policy(MESSAGES, MergePolicy::Append)
    }

    pub fn with_policy(self, field: impl Into<String>, policy: MergePolicy) -> Self {
        self.with_reducer(field, Arc::new(policy))
    }

    pub fn with_reducer(mut self, field: impl Into<String>, reducer: Arc<dyn Reducer>) -> Self {
        self.fields.insert(field.into(), reducer);
        self
    }

    pub fn reducer_for(&self, field: &str) -> &dyn Reducer {
        self.fields
            .get(field)
            .map(|r| r.as_ref())
            .unwrap_or_else(|| self.default_reducer.as_ref())
    }

    /// Merge `delta` into `state`. On error `state` is left untouched.
    pub fn apply(&self, state: &mut State, delta: &State) -> Result<(), StateError> {
        let mut reduced = Vec::with_capacity(delta.0.len());
        for (field, update) in delta.iter() {
            let current = state.get(field).unwrap_or(&Value::Null);
            let value = self.reducer_for(field).reduce(field, current, update)?;
            reduced.push((field.clone(), value));
        }
        for (field, value) in reduced {
            state.insert(field, value);
        }
        Ok(())
    }

    /// Like [`apply`](Self::apply) but returns a new state.
    pub fn merged(&self, state: &State, delta: &State) -> Result<State, StateError> {
        let mut next = state.clone();
        self.apply(&mut next, delta)?;
        Ok(next)
    }
}

impl Default for StateSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .map(|(field, reducer)| (field.as_str(), reducer.name()))
            .collect();
        fields.sort_unstable();
        f.debug_struct("StateSchema")
            .field("fields", &fields)
            .field("default", &self.default_reducer.name())
            .finish()
    }
}
