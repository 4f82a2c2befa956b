//! Error types for graph construction and execution
//!
//! Every runtime variant of [`GraphError`] carries the thread id and the step
//! at which it happened, so a caller can inspect or retry from that exact
//! point with the [`Inspector`](crate::Inspector).
//!
//! # Error Categories
//!
//! ## Retryable
//! - [`GraphError::NodeExecution`] - a node (model call, tool dispatch, merge) failed.
//!   The thread's latest checkpoint is the last good state; calling `invoke`
//!   again resumes cleanly from it.
//! - [`GraphError::Cancelled`] - the caller cancelled an in-flight node.
//!
//! ## Fatal to the invocation
//! - [`GraphError::Storage`] - the checkpoint store failed. Nothing from the
//!   failed write is visible.
//! - [`GraphError::StepLimitExceeded`] - the router never reached `END`.
//!   This is a graph bug, not a transient failure.
//! - [`GraphError::UnknownNode`] - the router named a node that is not registered.
//!
//! ## Protocol
//! - [`GraphError::ThreadSuspended`] - `invoke` on a thread waiting at a review gate.
//! - [`GraphError::NotSuspended`] - `resume` on a thread that is not waiting.
//!
//! Tool failures never appear here: the tools node records them as tool
//! result messages with an error payload.

use std::time::Duration;
use thiserror::Error;
use threadgraph_checkpoint::{CheckpointError, StateError, StepIndex};

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Failures reported by the language-model collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("model unavailable: {0}")]
    Unavailable(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(" (retry after {}ms)", d.as_millis()))
        .unwrap_or_default()
}

/// Why a single node failed.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("malformed message: {0}")]
    Message(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

impl NodeError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Errors surfaced by the engine, the graph builder and the inspector.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure is invalid (missing entry, dangling edge, reserved name)
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// Checkpoint persistence failed
    #[error("Storage failure on thread '{thread_id}'{}: {source}", at_step(.step))]
    Storage {
        thread_id: String,
        step: Option<StepIndex>,
        #[source]
        source: CheckpointError,
    },

    /// A checkpoint requested by the caller does not exist
    #[error("Checkpoint not found: thread '{thread_id}' step {step}")]
    CheckpointNotFound { thread_id: String, step: StepIndex },

    /// The router selected a node that is not registered
    #[error("Unknown node '{node}' on thread '{thread_id}' at step {step}")]
    UnknownNode {
        thread_id: String,
        step: StepIndex,
        node: String,
    },

    /// A node failed; the failed attempt was not checkpointed
    #[error("Node '{node}' failed on thread '{thread_id}' at step {step}: {cause}")]
    NodeExecution {
        thread_id: String,
        step: StepIndex,
        node: String,
        #[source]
        cause: NodeError,
    },

    /// The per-invocation step budget ran out before the router reached END
    #[error("Step limit of {limit} exceeded on thread '{thread_id}' at step {step}")]
    StepLimitExceeded {
        thread_id: String,
        step: StepIndex,
        limit: usize,
    },

    /// The caller cancelled an in-flight node
    #[error("Node '{node}' cancelled on thread '{thread_id}' at step {step}")]
    Cancelled {
        thread_id: String,
        step: StepIndex,
        node: String,
    },

    /// The caller's input could not be merged into the thread state
    #[error("Invalid input for thread '{thread_id}' at step {step}: {source}")]
    InvalidInput {
        thread_id: String,
        step: StepIndex,
        #[source]
        source: StateError,
    },

    /// `invoke` was called while the thread waits for a review resolution
    #[error("Thread '{thread_id}' is waiting at '{gate}' (step {step}); resume it with a resolution")]
    ThreadSuspended {
        thread_id: String,
        step: StepIndex,
        gate: String,
    },

    /// `resume` was called on a thread that is not waiting for review
    #[error("Thread '{thread_id}' is not waiting for review{}", at_step(.step))]
    NotSuspended {
        thread_id: String,
        step: Option<StepIndex>,
    },
}

fn at_step(step: &Option<StepIndex>) -> String {
    step.map(|s| format!(" at step {}", s)).unwrap_or_default()
}

impl GraphError {
    /// Map a store failure, keeping lookups that missed distinguishable.
    pub fn storage(
        thread_id: impl Into<String>,
        step: Option<StepIndex>,
        source: CheckpointError,
    ) -> Self {
        let thread_id = thread_id.into();
        match source {
            CheckpointError::NotFound { thread_id, step } => {
                Self::CheckpointNotFound { thread_id, step }
            }
            source => Self::Storage {
                thread_id,
                step,
                source,
            },
        }
    }

    pub fn node_execution(
        thread_id: impl Into<String>,
        step: StepIndex,
        node: impl Into<String>,
        cause: impl Into<NodeError>,
    ) -> Self {
        Self::NodeExecution {
            thread_id: thread_id.into(),
            step,
            node: node.into(),
            cause: cause.into(),
        }
    }

    /// Thread the error belongs to, if it happened while running one.
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            Self::Validation(_) => None,
            Self::Storage { thread_id, .. }
            | Self::CheckpointNotFound { thread_id, .. }
            | Self::UnknownNode { thread_id, .. }
            | Self::NodeExecution { thread_id, .. }
            | Self::StepLimitExceeded { thread_id, .. }
            | Self::Cancelled { thread_id, .. }
            | Self::InvalidInput { thread_id, .. }
            | Self::ThreadSuspended { thread_id, .. }
            | Self::NotSuspended { thread_id, .. } => Some(thread_id),
        }
    }

    /// Step at which the error happened, when known.
    pub fn step(&self) -> Option<StepIndex> {
        match self {
            Self::Validation(_) => None,
            Self::Storage { step, .. } | Self::NotSuspended { step, .. } => *step,
            Self::CheckpointNotFound { step, .. }
            | Self::UnknownNode { step, .. }
            | Self::NodeExecution { step, .. }
            | Self::StepLimitExceeded { step, .. }
            | Self::Cancelled { step, .. }
            | Self::InvalidInput { step, .. }
            | Self::ThreadSuspended { step, .. } => Some(*step),
        }
    }

    /// True when repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NodeExecution { .. } | Self::Cancelled { .. })
    }
}
