//! Time-travel inspection
//!
//! Read-only views over a thread's history plus [`fork`](Inspector::fork),
//! which copies a prefix of one thread into a new one. Nothing here modifies
//! an existing checkpoint.

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::review::PendingReview;
use crate::router::NextNode;
use futures::TryStreamExt;
use std::sync::Arc;
use threadgraph_checkpoint::{Checkpoint, CheckpointStore, CheckpointSummary, HistoryQuery, StepIndex};

#[derive(Clone)]
pub struct Inspector {
    graph: Arc<Graph>,
    store: Arc<dyn CheckpointStore>,
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector").finish_non_exhaustive()
    }
}

impl Inspector {
    pub(crate) fn new(graph: Arc<Graph>, store: Arc<dyn CheckpointStore>) -> Self {
        Self { graph, store }
    }

    /// Summaries of every checkpoint on the thread, newest first.
    pub async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointSummary>> {
        self.list_with(thread_id, HistoryQuery::default()).await
    }

    /// Filtered summaries, newest first.
    pub async fn list_with(&self, thread_id: &str, query: HistoryQuery) -> Result<Vec<CheckpointSummary>> {
        let storage = |e| GraphError::storage(thread_id, None, e);
        self.store
            .list(thread_id, query)
            .await
            .map_err(storage)?
            .map_ok(|checkpoint| checkpoint.summary())
            .try_collect()
            .await
            .map_err(storage)
    }

    pub async fn get(&self, thread_id: &str, step: StepIndex) -> Result<Checkpoint> {
        self.store
            .get(thread_id, step)
            .await
            .map_err(|e| GraphError::storage(thread_id, Some(step), e))
    }

    pub async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.store
            .latest(thread_id)
            .await
            .map_err(|e| GraphError::storage(thread_id, None, e))
    }

    /// Node the engine would run after checkpoint `step`.
    pub async fn next_node(&self, thread_id: &str, step: StepIndex) -> Result<NextNode> {
        let checkpoint = self.get(thread_id, step).await?;
        Ok(self.graph.next_after(&checkpoint.node, &checkpoint.state))
    }

    /// Copy steps `0..=step` into `new_thread_id` and return the newest copy.
    ///
    /// The fork is an ordinary thread afterwards: invoking it never touches
    /// the source.
    #[tracing::instrument(skip(self))]
    pub async fn fork(
        &self,
        thread_id: &str,
        step: StepIndex,
        new_thread_id: &str,
    ) -> Result<CheckpointSummary> {
        let copied = self
            .store
            .fork(thread_id, step, new_thread_id)
            .await
            .map_err(|e| GraphError::storage(thread_id, Some(step), e))?;

        let newest = copied.last().ok_or(GraphError::CheckpointNotFound {
            thread_id: thread_id.to_string(),
            step,
        })?;
        tracing::info!(copied = copied.len(), "Thread forked");
        Ok(newest.summary())
    }

    /// The review the thread is waiting for, if any.
    pub async fn pending_review(&self, thread_id: &str) -> Result<Option<PendingReview>> {
        Ok(self.latest(thread_id).await?.and_then(|checkpoint| {
            self.graph
                .suspended_gate(&checkpoint.node, &checkpoint.state)
                .map(|gate| PendingReview::from_state(gate, checkpoint.step, &checkpoint.state))
        }))
    }

    pub async fn threads(&self) -> Result<Vec<String>> {
        self.store
            .threads()
            .await
            .map_err(|e| GraphError::storage("*", None, e))
    }
}
