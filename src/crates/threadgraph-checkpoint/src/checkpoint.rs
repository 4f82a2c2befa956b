//! Checkpoint records

use crate::state::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a checkpoint within its thread, starting at 0.
pub type StepIndex = u64;

/// Immutable snapshot of a thread's state after one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub step: StepIndex,
    /// Name of the node (or input marker) that produced this state
    pub node: String,
    pub state: State,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn message_count(&self) -> usize {
        self.state.message_count()
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            thread_id: self.thread_id.clone(),
            step: self.step,
            node: self.node.clone(),
            message_count: self.message_count(),
            created_at: self.created_at,
        }
    }

    /// Same checkpoint filed under another thread.
    pub fn rehome(&self, thread_id: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            ..self.clone()
        }
    }
}

/// Lightweight view used for history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub thread_id: String,
    pub step: StepIndex,
    pub node: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

/// A state waiting to be appended. The store assigns the step and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCheckpoint {
    pub node: String,
    pub state: State,
}

impl PendingCheckpoint {
    pub fn new(node: impl Into<String>, state: State) -> Self {
        Self {
            node: node.into(),
            state,
        }
    }
}

/// Filters for [`CheckpointStore::list`](crate::CheckpointStore::list).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only checkpoints strictly older than this step
    pub before: Option<StepIndex>,
    /// Only checkpoints produced by this node
    pub node: Option<String>,
    /// Stop after this many results
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before(mut self, step: StepIndex) -> Self {
        self.before = Some(step);
        self
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, checkpoint: &Checkpoint) -> bool {
        self.before.map_or(true, |before| checkpoint.step < before)
            && self.node.as_deref().map_or(true, |node| checkpoint.node == node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkpoint(step: StepIndex, node: &str) -> Checkpoint {
        Checkpoint {
            thread_id: "t".to_string(),
            step,
            node: node.to_string(),
            state: State::new().with("messages", json!([{"role": "human", "content": "hi"}])),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_counts_messages() {
        let summary = checkpoint(3, "chatbot").summary();
        assert_eq!(summary.step, 3);
        assert_eq!(summary.node, "chatbot");
        assert_eq!(summary.message_count, 1);
    }

    #[test]
    fn test_history_query_filters() {
        let query = HistoryQuery::new().before(2).node("tools");
        assert!(query.matches(&checkpoint(1, "tools")));
        assert!(!query.matches(&checkpoint(2, "tools")));
        assert!(!query.matches(&checkpoint(0, "chatbot")));
        assert!(HistoryQuery::new().matches(&checkpoint(9, "anything")));
    }

    #[test]
    fn test_rehome_keeps_snapshot() {
        let original = checkpoint(0, "__input__");
        let copy = original.rehome("fork");
        assert_eq!(copy.thread_id, "fork");
        assert_eq!(copy.state, original.state);
        assert_eq!(copy.created_at, original.created_at);
    }
}
