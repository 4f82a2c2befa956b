//! Routing between nodes
//!
//! After a node completes the engine asks the [`RoutingTable`] for the next
//! node. Decisions are pure functions of `(current node, state)`: routers hold
//! no memory of their own, so replaying from any checkpoint reproduces the
//! same path.
//!
//! The table is total. A node without an outgoing edge, or a branch label
//! that is not mapped, resolves to [`NextNode::End`].

use crate::messages::pending_tool_calls;
use crate::review::ReviewOutcome;
use crate::tool::TOOLS_NODE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use threadgraph_checkpoint::State;

/// Sentinel name for termination, accepted wherever a node name is.
pub const END: &str = "__end__";

/// Default name of the model-calling node.
pub const CHATBOT_NODE: &str = "chatbot";

/// Default name of the review gate.
pub const HUMAN_REVIEW_NODE: &str = "human_review";

/// Outcome of a routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextNode {
    Node(String),
    End,
}

impl NextNode {
    pub fn node(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == END {
            NextNode::End
        } else {
            NextNode::Node(name)
        }
    }

    pub fn name(&self) -> &str {
        match self {
            NextNode::Node(name) => name,
            NextNode::End => END,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NextNode::End)
    }
}

impl From<&str> for NextNode {
    fn from(name: &str) -> Self {
        NextNode::node(name)
    }
}

impl fmt::Display for NextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type RouterFn = Arc<dyn Fn(&State) -> NextNode + Send + Sync>;

pub type BranchFn = Arc<dyn Fn(&State) -> String + Send + Sync>;

/// Outgoing edge of one node.
#[derive(Clone)]
pub enum Edge {
    /// Fixed successor
    Direct(NextNode),
    /// Successor computed from state
    Conditional(RouterFn),
    /// Label computed from state, mapped to a successor
    Branch {
        router: BranchFn,
        branches: HashMap<String, NextNode>,
    },
}

impl Edge {
    fn resolve(&self, state: &State) -> NextNode {
        match self {
            Edge::Direct(next) => next.clone(),
            Edge::Conditional(router) => router(state),
            Edge::Branch { router, branches } => {
                let label = router(state);
                match branches.get(&label) {
                    Some(next) => next.clone(),
                    None => {
                        tracing::debug!(%label, "Unmapped branch label, ending");
                        NextNode::End
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Direct(next) => f.debug_tuple("Direct").field(next).finish(),
            Edge::Conditional(_) => f.debug_tuple("Conditional").field(&"<function>").finish(),
            Edge::Branch { branches, .. } => f
                .debug_struct("Branch")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
        }
    }
}

/// Node name -> outgoing edge.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    edges: HashMap<String, Edge>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outgoing edge of `from`, replacing any previous one.
    pub fn set(&mut self, from: impl Into<String>, edge: Edge) {
        self.edges.insert(from.into(), edge);
    }

    pub fn edge(&self, from: &str) -> Option<&Edge> {
        self.edges.get(from)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&String, &Edge)> {
        self.edges.iter()
    }

    /// Next node after `current` given `state`.
    pub fn decide(&self, current: &str, state: &State) -> NextNode {
        match self.edges.get(current) {
            Some(edge) => edge.resolve(state),
            None => NextNode::End,
        }
    }
}

/// Tool-dispatch routing: pending tool calls go to `tools`, otherwise end.
pub fn tools_condition(state: &State) -> NextNode {
    if pending_tool_calls(state).is_empty() {
        NextNode::End
    } else {
        NextNode::node(TOOLS_NODE)
    }
}

/// Human-approval routing: pending tool calls go to the review gate first.
pub fn review_condition(state: &State) -> NextNode {
    if pending_tool_calls(state).is_empty() {
        NextNode::End
    } else {
        NextNode::node(HUMAN_REVIEW_NODE)
    }
}

/// Routing out of the review gate, driven by the recorded outcome.
///
/// Approved calls proceed to `tools`, revisions return to `chatbot`, and
/// rejections (or anything unrecognized) end the run.
pub fn after_review(state: &State) -> NextNode {
    match ReviewOutcome::from_state(state) {
        Some(ReviewOutcome::Approved) if !pending_tool_calls(state).is_empty() => {
            NextNode::node(TOOLS_NODE)
        }
        Some(ReviewOutcome::Revised) => NextNode::node(CHATBOT_NODE),
        _ => NextNode::End,
    }
}
