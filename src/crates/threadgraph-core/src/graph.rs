//! Graph definition
//!
//! A [`Graph`] is a node registry plus a routing table, an entry node and the
//! state schema. It is assembled with [`GraphBuilder`] and validated once at
//! build time.
//!
//! ```rust
//! use serde_json::json;
//! use std::sync::Arc;
//! use threadgraph_checkpoint::{InMemoryCheckpointStore, State};
//! use threadgraph_core::{node_fn, GraphBuilder, END};
//!
//! let mut builder = GraphBuilder::new();
//! builder
//!     .add_node("greet", node_fn(|_state| async {
//!         Ok(State::new().with("greeting", json!("hello")))
//!     }))
//!     .add_edge("greet", END)
//!     .set_entry("greet");
//!
//! let engine = builder.compile(Arc::new(InMemoryCheckpointStore::new())).unwrap();
//! assert_eq!(engine.graph().entry(), "greet");
//! ```

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{GraphError, Result};
use crate::node::{NodeFn, NodeRegistry};
use crate::review::APPROVAL_FIELD;
use crate::router::{Edge, NextNode, RoutingTable, END};
use std::collections::HashMap;
use std::sync::Arc;
use threadgraph_checkpoint::{CheckpointStore, State, StateSchema, MESSAGES};

/// Producer name of the checkpoint holding a caller's merged input.
pub const INPUT_NODE: &str = "__input__";

#[derive(Debug, Clone)]
pub struct GraphBuilder {
    registry: NodeRegistry,
    routes: RoutingTable,
    entry: Option<String>,
    schema: StateSchema,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Empty graph using the conversation schema (`messages` appends).
    pub fn new() -> Self {
        Self {
            registry: NodeRegistry::new(),
            routes: RoutingTable::new(),
            entry: None,
            schema: StateSchema::conversation(),
        }
    }

    pub fn with_schema(mut self, schema: StateSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn add_node(&mut self, name: impl Into<String>, executor: NodeFn) -> &mut Self {
        self.registry.register(name, executor);
        self
    }

    /// Register a node the engine suspends in front of until an approval is recorded.
    pub fn add_gate(&mut self, name: impl Into<String>, executor: NodeFn) -> &mut Self {
        self.registry.register_gate(name, executor);
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.routes.set(from, Edge::Direct(NextNode::node(to)));
        self
    }

    pub fn add_conditional_edge<F>(&mut self, from: impl Into<String>, router: F) -> &mut Self
    where
        F: Fn(&State) -> NextNode + Send + Sync + 'static,
    {
        self.routes.set(from, Edge::Conditional(Arc::new(router)));
        self
    }

    /// Route by label: `router` names a branch, `branches` maps it to a node.
    pub fn add_branch<F, I, K, V>(&mut self, from: impl Into<String>, router: F, branches: I) -> &mut Self
    where
        F: Fn(&State) -> String + Send + Sync + 'static,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let branches: HashMap<String, NextNode> = branches
            .into_iter()
            .map(|(label, to)| (label.into(), NextNode::node(to)))
            .collect();
        self.routes.set(
            from,
            Edge::Branch {
                router: Arc::new(router),
                branches,
            },
        );
        self
    }

    pub fn set_entry(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Graph> {
        let entry = self
            .entry
            .ok_or_else(|| GraphError::Validation("no entry node set".to_string()))?;

        let graph = Graph {
            registry: self.registry,
            routes: self.routes,
            entry,
            schema: self.schema,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Validate and bind the graph to a store with default settings.
    pub fn compile(self, store: Arc<dyn CheckpointStore>) -> Result<Engine> {
        self.compile_with_config(store, EngineConfig::default())
    }

    pub fn compile_with_config(
        self,
        store: Arc<dyn CheckpointStore>,
        config: EngineConfig,
    ) -> Result<Engine> {
        Ok(Engine::new(Arc::new(self.build()?), store, config))
    }
}

/// Validated, immutable graph.
#[derive(Debug, Clone)]
pub struct Graph {
    registry: NodeRegistry,
    routes: RoutingTable,
    entry: String,
    schema: StateSchema,
}

impl Graph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Routing decision after `current` produced `state`.
    ///
    /// An input checkpoint always continues at the entry node.
    pub fn next_after(&self, current: &str, state: &State) -> NextNode {
        if current == INPUT_NODE {
            return NextNode::node(self.entry.clone());
        }
        self.routes.decide(current, state)
    }

    /// Gate a thread whose newest checkpoint is `(node, state)` is waiting at.
    pub fn suspended_gate(&self, node: &str, state: &State) -> Option<String> {
        match self.next_after(node, state) {
            NextNode::Node(next) if self.registry.is_gate(&next) && !state.is_set(APPROVAL_FIELD) => {
                Some(next)
            }
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(GraphError::Validation(reason));

        for reserved in [INPUT_NODE, END] {
            if self.registry.contains(reserved) {
                return invalid(format!("'{}' is a reserved node name", reserved));
            }
        }

        if !self.registry.contains(&self.entry) {
            return invalid(format!("entry node '{}' does not exist", self.entry));
        }

        for (from, edge) in self.routes.edges() {
            if !self.registry.contains(from) {
                return invalid(format!("edge source '{}' does not exist", from));
            }
            let targets: Vec<&NextNode> = match edge {
                Edge::Direct(next) => vec![next],
                Edge::Conditional(_) => Vec::new(),
                Edge::Branch { branches, .. } => branches.values().collect(),
            };
            for target in targets {
                if let NextNode::Node(name) = target {
                    if !self.registry.contains(name) {
                        return invalid(format!("edge target '{}' (from '{}') does not exist", name, from));
                    }
                }
            }
        }

        let policy = self.schema.reducer_for(MESSAGES).name();
        if policy != "append" {
            return invalid(format!(
                "'{}' must use the append policy, found '{}'",
                MESSAGES, policy
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::node_fn;
    use serde_json::json;
    use threadgraph_checkpoint::MergePolicy;

    fn noop() -> NodeFn {
        node_fn(|_| async { Ok(State::new()) })
    }

    #[test]
    fn test_valid_graph() {
        let mut builder = GraphBuilder::new();
        builder
            .add_node("chatbot", noop())
            .add_node("tools", noop())
            .add_conditional_edge("chatbot", crate::router::tools_condition)
            .add_edge("tools", "chatbot")
            .set_entry("chatbot");
        let graph = builder.build().unwrap();

        assert_eq!(graph.entry(), "chatbot");
        assert_eq!(graph.next_after(INPUT_NODE, &State::new()), NextNode::node("chatbot"));
        assert_eq!(graph.next_after("tools", &State::new()), NextNode::node("chatbot"));
    }

    #[test]
    fn test_missing_entry() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", noop());
        assert!(matches!(builder.build(), Err(GraphError::Validation(_))));

        let mut builder = GraphBuilder::new();
        builder.add_node("a", noop()).set_entry("b");
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_dangling_edge_target() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", noop()).add_edge("a", "ghost").set_entry("a");
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("'ghost'"));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut builder = GraphBuilder::new();
        builder.add_node(INPUT_NODE, noop()).set_entry(INPUT_NODE);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_messages_must_append() {
        let mut builder = GraphBuilder::new()
            .with_schema(StateSchema::new().with_policy(MESSAGES, MergePolicy::Replace));
        builder.add_node("a", noop()).set_entry("a");
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_suspended_gate_respects_approval() {
        let mut builder = GraphBuilder::new();
        builder
            .add_node("chatbot", noop())
            .add_gate("human_review", noop())
            .add_edge("chatbot", "human_review")
            .set_entry("chatbot");
        let graph = builder.build().unwrap();

        let waiting = State::new();
        assert_eq!(graph.suspended_gate("chatbot", &waiting), Some("human_review".to_string()));

        let approved = State::new().with(APPROVAL_FIELD, json!("approve"));
        assert_eq!(graph.suspended_gate("chatbot", &approved), None);

        let cleared = State::new().with(APPROVAL_FIELD, serde_json::Value::Null);
        assert!(graph.suspended_gate("chatbot", &cleared).is_some());
    }
}
