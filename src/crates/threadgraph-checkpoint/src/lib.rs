//! # threadgraph-checkpoint - Conversation State and Checkpoint Logs
//!
//! **State model and append-only checkpoint storage** for the threadgraph
//! execution engine. Every conversation thread owns an ordered log of
//! immutable snapshots; the newest one is the thread's current state.
//!
//! ## Overview
//!
//! - **[`State`]** - schema-less JSON object carried between steps
//! - **[`StateSchema`]** - per-field merge declarations ([`MergePolicy`] or a custom [`Reducer`])
//! - **[`Checkpoint`]** - `(thread_id, step, node, state, created_at)`, never modified once written
//! - **[`CheckpointStore`]** - append / latest / get / history / fork over per-thread logs
//!
//! Two backends ship with the crate:
//!
//! - [`InMemoryCheckpointStore`] - process-local, for tests and ephemeral sessions
//! - [`SqliteCheckpointStore`] - durable single-file store (WAL, `synchronous = FULL`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use serde_json::json;
//! use threadgraph_checkpoint::{CheckpointStore, InMemoryCheckpointStore, State};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryCheckpointStore::new();
//!
//!     let state = State::new().with("messages", json!([{"role": "human", "content": "hi"}]));
//!     let step = store.append("thread-1", "__input__", &state).await?;
//!     assert_eq!(step, 0);
//!
//!     let mut history = store.history("thread-1").await?;
//!     while let Some(checkpoint) = history.next().await {
//!         let checkpoint = checkpoint?;
//!         println!("{} {} {}", checkpoint.step, checkpoint.node, checkpoint.message_count());
//!     }
//!
//!     // Branch off step 0 without touching thread-1
//!     store.fork("thread-1", 0, "thread-1-alt").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        threadgraph-core (Engine)            │
//! │  merge delta -> append checkpoint -> route  │
//! └────────────────────┬────────────────────────┘
//!                      │ append_all / latest / list / fork
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │        CheckpointStore trait (this crate)   │
//! └──────────┬───────────────────────┬──────────┘
//!            ▼                       ▼
//!   ┌─────────────────┐     ┌─────────────────┐
//!   │    In-Memory    │     │     SQLite      │
//!   └─────────────────┘     └─────────────────┘
//! ```

pub mod checkpoint;
pub mod error;
pub mod locks;
pub mod memory;
pub mod sqlite;
pub mod state;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointSummary, HistoryQuery, PendingCheckpoint, StepIndex};
pub use error::{CheckpointError, Result};
pub use locks::{ThreadGuard, ThreadLocks};
pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use state::{MergePolicy, Reducer, State, StateError, StateSchema, MESSAGES};
pub use store::{CheckpointStore, CheckpointStream};
