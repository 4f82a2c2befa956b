//! Node registry
//!
//! A node is an async function `State -> State delta`. It never writes
//! checkpoints; the engine merges and persists whatever it returns.

use crate::error::NodeError;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use threadgraph_checkpoint::State;

pub type NodeFuture = Pin<Box<dyn Future<Output = Result<State, NodeError>> + Send>>;

pub type NodeFn = Arc<dyn Fn(State) -> NodeFuture + Send + Sync>;

/// Box an async closure into a [`NodeFn`].
pub fn node_fn<F, Fut>(f: F) -> NodeFn
where
    F: Fn(State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<State, NodeError>> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

/// How the engine treats a node when routing reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Runs as soon as it is routed to
    Step,
    /// Runs only once an approval is present in state; otherwise the engine suspends
    Gate,
}

#[derive(Clone)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
    pub executor: NodeFn,
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("executor", &"<function>")
            .finish()
    }
}

/// Failure of [`NodeRegistry::invoke`].
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{node}' failed: {cause}")]
    Failed {
        node: String,
        #[source]
        cause: NodeError,
    },
}

#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeSpec>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, executor: NodeFn) {
        self.insert(name.into(), NodeKind::Step, executor);
    }

    pub fn register_gate(&mut self, name: impl Into<String>, executor: NodeFn) {
        self.insert(name.into(), NodeKind::Gate, executor);
    }

    fn insert(&mut self, name: String, kind: NodeKind, executor: NodeFn) {
        self.nodes.insert(
            name.clone(),
            NodeSpec {
                name,
                kind,
                executor,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<NodeKind> {
        self.nodes.get(name).map(|spec| spec.kind)
    }

    pub fn is_gate(&self, name: &str) -> bool {
        self.kind(name) == Some(NodeKind::Gate)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Run `name` against `state` and return its delta.
    pub async fn invoke(&self, name: &str, state: State) -> Result<State, InvokeError> {
        let spec = self
            .nodes
            .get(name)
            .ok_or_else(|| InvokeError::UnknownNode(name.to_string()))?;

        (spec.executor)(state)
            .await
            .map_err(|cause| InvokeError::Failed {
                node: name.to_string(),
                cause,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_invoke_registered_node() {
        let mut registry = NodeRegistry::new();
        registry.register(
            "count",
            node_fn(|state: State| async move {
                let n = state.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(State::new().with("n", json!(n + 1)))
            }),
        );

        let delta = registry
            .invoke("count", State::new().with("n", json!(4)))
            .await
            .unwrap();
        assert_eq!(delta.get("n"), Some(&json!(5)));
        assert_eq!(registry.kind("count"), Some(NodeKind::Step));
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let registry = NodeRegistry::new();
        let err = registry.invoke("ghost", State::new()).await.unwrap_err();
        assert!(matches!(err, InvokeError::UnknownNode(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_failure_is_wrapped_with_node_name() {
        let mut registry = NodeRegistry::new();
        registry.register(
            "broken",
            node_fn(|_| async { Err(NodeError::failed("no luck")) }),
        );
        match registry.invoke("broken", State::new()).await {
            Err(InvokeError::Failed { node, cause }) => {
                assert_eq!(node, "broken");
                assert_eq!(cause.to_string(), "no luck");
            }
            other => panic!("expected failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_gate_kind() {
        let mut registry = NodeRegistry::new();
        registry.register_gate("human_review", node_fn(|_| async { Ok(State::new()) }));
        assert!(registry.is_gate("human_review"));
        assert!(!registry.is_gate("chatbot"));
        assert_eq!(registry.names(), vec!["human_review"]);
    }
}
