//! # threadgraph-core - Checkpointed Conversation Graphs
//!
//! A **resumable state machine for conversational agents**. A graph of named
//! nodes (model calls, tool dispatch, review gates) advances a per-thread
//! [`State`] one node at a time; after every node the merged state is written
//! to a [`CheckpointStore`], so any thread can be resumed, inspected, or
//! forked from any past step.
//!
//! ## Core Concepts
//!
//! - **[`GraphBuilder`] / [`Graph`]** - nodes, routing table, entry node and state schema
//! - **[`Engine`]** - `invoke`, `resume`, `stream` and `replay_from` over a store
//! - **[`RoutingTable`]** - pure `(node, state) -> next node` decisions, [`END`] by default
//! - **[`HumanReviewGate`]** - suspension point for tool calls awaiting approval
//! - **[`Inspector`]** - history listing, past checkpoints and forks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use threadgraph_checkpoint::InMemoryCheckpointStore;
//! use threadgraph_core::{messages_update, prebuilt, ChatModel, Message, Resolution, ToolRegistry};
//!
//! # async fn example(model: Arc<dyn ChatModel>, tools: ToolRegistry) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = prebuilt::reviewed_tool_agent(model, Arc::new(tools), Default::default())
//!     .compile(Arc::new(InMemoryCheckpointStore::new()))?;
//!
//! let input = messages_update(vec![Message::human("What is the population of Turkey?")])?;
//! let outcome = engine.invoke("thread-1", input).await?;
//!
//! if let Some(pending) = &outcome.pending {
//!     println!("{}", pending.description);
//!     let outcome = engine.resume("thread-1", Resolution::Approve).await?;
//!     println!("{:?}", outcome.status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Execution Model
//!
//! ```text
//!  ┌──────────┐   invoke/resume   ┌──────────┐  run node  ┌──────────────┐
//!  │  Caller  │ ────────────────► │  Engine  │ ─────────► │ NodeRegistry │
//!  └──────────┘ ◄──────────────── └────┬─────┘ ◄───────── └──────────────┘
//!     COMPLETED / SUSPENDED            │  delta
//!                                      │ merge + append
//!                                      ▼
//!                              ┌─────────────────┐
//!                              │ CheckpointStore │
//!                              └─────────────────┘
//! ```
//!
//! Nodes run strictly one after another within a thread. A node failure,
//! a cancellation or a storage failure never leaves a partial checkpoint.

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod inspector;
pub mod llm;
pub mod messages;
pub mod node;
pub mod persona;
pub mod prebuilt;
pub mod review;
pub mod router;
pub mod tool;

pub use config::EngineConfig;
pub use engine::{Engine, EventStream, ExecutionEvent, RunOutcome, RunStatus, ThreadStatus};
pub use error::{GraphError, ModelError, NodeError, Result};
pub use graph::{Graph, GraphBuilder, INPUT_NODE};
pub use inspector::Inspector;
pub use llm::{ChatModel, ChatNode, SystemPromptFn};
pub use messages::{last_message, messages, messages_update, pending_tool_calls, Message, MessageRole};
pub use node::{node_fn, InvokeError, NodeFn, NodeKind, NodeRegistry};
pub use persona::Mode;
pub use review::{HumanReviewGate, PendingReview, Resolution, ReviewOutcome};
pub use router::{
    after_review, review_condition, tools_condition, Edge, NextNode, RoutingTable, CHATBOT_NODE, END,
    HUMAN_REVIEW_NODE,
};
pub use tool::{Tool, ToolCall, ToolCallResult, ToolDefinition, ToolError, ToolNode, ToolOutput, ToolRegistry, TOOLS_NODE};

pub use threadgraph_checkpoint::{CheckpointStore, State, StateSchema, StepIndex};
pub use tokio_util::sync::CancellationToken;
