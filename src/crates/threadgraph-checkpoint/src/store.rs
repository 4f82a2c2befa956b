//! Storage trait for checkpoint backends
//!
//! The [`CheckpointStore`] trait is the only shared, mutable resource of the
//! engine. A store keeps one append-only log of [`Checkpoint`]s per thread:
//!
//! ```text
//! thread "t1":  step 0 (__input__) -> step 1 (chatbot) -> step 2 (tools) -> ...
//! thread "t2":  step 0 (__input__) -> step 1 (chatbot)
//! ```
//!
//! # Contract
//!
//! - **Gapless ordering** - steps are assigned by the store and are exactly
//!   `0, 1, 2, ...` per thread.
//! - **Atomic appends** - [`append_all`](CheckpointStore::append_all) commits
//!   every staged checkpoint or none of them. Partial writes are never
//!   observable.
//! - **Durability** - a returned step index has reached the backing medium.
//! - **Serialization per thread** - every batch names the step it expects to
//!   be the thread's latest. The check and the write happen as one unit, so
//!   of two writers that read the same latest step only the first commits and
//!   the second fails with [`CheckpointError::Conflict`]. Appends to different
//!   threads never wait on each other.
//! - **Immutability** - a written checkpoint is never modified or removed.
//!   [`fork`](CheckpointStore::fork) copies a prefix into a new thread instead.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use threadgraph_checkpoint::{
//!     Checkpoint, CheckpointStore, CheckpointStream, HistoryQuery, PendingCheckpoint,
//!     Result, StepIndex,
//! };
//!
//! struct RedisCheckpointStore { /* ... */ }
//!
//! #[async_trait]
//! impl CheckpointStore for RedisCheckpointStore {
//!     async fn append_all(&self, thread_id: &str, parent: Option<StepIndex>, writes: Vec<PendingCheckpoint>)
//!         -> Result<Vec<StepIndex>> { /* WATCH / LLEN / MULTI / RPUSH / EXEC */ }
//!     async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> { /* LINDEX -1 */ }
//!     async fn get(&self, thread_id: &str, step: StepIndex) -> Result<Checkpoint> { /* LINDEX */ }
//!     async fn list(&self, thread_id: &str, query: HistoryQuery) -> Result<CheckpointStream> { /* LRANGE */ }
//!     async fn fork(&self, thread_id: &str, step: StepIndex, new_thread_id: &str)
//!         -> Result<Vec<Checkpoint>> { /* LRANGE + RPUSH in MULTI */ }
//!     async fn threads(&self) -> Result<Vec<String>> { /* SCAN */ }
//! }
//! ```

use crate::{
    checkpoint::{Checkpoint, HistoryQuery, PendingCheckpoint, StepIndex},
    error::{CheckpointError, Result},
    state::State,
};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Finite stream of checkpoints, newest first.
///
/// Each call to [`CheckpointStore::list`] produces a fresh stream, so a
/// history can be walked as many times as needed.
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<Checkpoint>> + Send + 'static>>;

/// Append-only, per-thread checkpoint log.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append one checkpoint after whatever is currently latest and return
    /// the step it was assigned.
    ///
    /// Retries when another writer got in between reading the latest step
    /// and writing.
    async fn append(&self, thread_id: &str, node: &str, state: &State) -> Result<StepIndex> {
        loop {
            let parent = self.latest(thread_id).await?.map(|c| c.step);
            let write = vec![PendingCheckpoint::new(node, state.clone())];
            match self.append_all(thread_id, parent, write).await {
                Ok(steps) => {
                    return steps
                        .first()
                        .copied()
                        .ok_or_else(|| CheckpointError::Storage("append returned no step".to_string()))
                }
                Err(e) if e.is_conflict() => {
                    tracing::trace!(thread_id, "Append raced another writer, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Append several checkpoints as one atomic unit, in order.
    ///
    /// `parent` is the step the caller last saw as the thread's latest, `None`
    /// for a thread it saw empty. If the thread has moved on since, nothing
    /// is written and the call fails with [`CheckpointError::Conflict`].
    ///
    /// Returns the assigned steps. An empty batch is a no-op.
    async fn append_all(
        &self,
        thread_id: &str,
        parent: Option<StepIndex>,
        writes: Vec<PendingCheckpoint>,
    ) -> Result<Vec<StepIndex>>;

    /// The thread's current state, or `None` for an unknown thread.
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Fetch one checkpoint. Fails with [`CheckpointError::NotFound`] when absent.
    async fn get(&self, thread_id: &str, step: StepIndex) -> Result<Checkpoint>;

    /// Filtered history, newest first.
    async fn list(&self, thread_id: &str, query: HistoryQuery) -> Result<CheckpointStream>;

    /// Full history, newest first.
    async fn history(&self, thread_id: &str) -> Result<CheckpointStream> {
        self.list(thread_id, HistoryQuery::default()).await
    }

    /// Copy steps `0..=step` of `thread_id` into the empty thread `new_thread_id`.
    ///
    /// Fails with [`CheckpointError::NotFound`] if `step` does not exist and
    /// with [`CheckpointError::ThreadExists`] if the target already has
    /// history. The source thread is never modified. Returns the copies in
    /// ascending order.
    async fn fork(
        &self,
        thread_id: &str,
        step: StepIndex,
        new_thread_id: &str,
    ) -> Result<Vec<Checkpoint>>;

    /// Known thread identifiers, sorted.
    async fn threads(&self) -> Result<Vec<String>>;
}
