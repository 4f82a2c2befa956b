//! Graph execution engine
//!
//! The [`Engine`] advances one thread at a time through a compiled [`Graph`],
//! writing a checkpoint after every node:
//!
//! ```text
//!  invoke(thread, input)
//!        │
//!        ▼
//!  load latest ──► merge input ──► stage "__input__" checkpoint
//!                                        │
//!        ┌───────────────────────────────┘
//!        ▼
//!  ┌─► gate without approval? ── yes ──► commit staged, return SUSPENDED
//!  │     │ no
//!  │     ▼
//!  │   run node ── error ──► discard staged, return error
//!  │     │
//!  │     ▼
//!  │   merge delta, append checkpoint(s) atomically, emit event
//!  │     │
//!  │     ▼
//!  └── route ── END ──► return COMPLETED
//! ```
//!
//! The input checkpoint is committed together with the first successful node,
//! so a failing first node leaves the thread exactly as it was.
//!
//! Invocations on the same thread are serialized; different threads run
//! concurrently. A run that races another engine on the same store fails
//! with a storage conflict and writes nothing. An in-flight node can be abandoned through a
//! [`CancellationToken`]; the cancelled step is never checkpointed.

use crate::config::EngineConfig;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, INPUT_NODE};
use crate::inspector::Inspector;
use crate::node::InvokeError;
use crate::review::{PendingReview, Resolution, APPROVAL_FIELD, REVIEW_FIELD};
use crate::router::NextNode;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use threadgraph_checkpoint::{
    CheckpointStore, PendingCheckpoint, State, StateError, StepIndex, ThreadLocks,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// How an invocation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The router returned `END`
    Completed,
    /// Routing reached a review gate with no approval recorded
    Suspended,
}

/// Result of `invoke`, `resume` or `replay_from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub state: State,
    pub status: RunStatus,
    /// Step of the thread's newest checkpoint
    pub step: StepIndex,
    /// Set when `status` is [`RunStatus::Suspended`]
    pub pending: Option<PendingReview>,
}

impl RunOutcome {
    fn completed(state: State, step: StepIndex) -> Self {
        Self {
            state,
            status: RunStatus::Completed,
            step,
            pending: None,
        }
    }

    fn suspended(state: State, step: StepIndex, pending: PendingReview) -> Self {
        Self {
            state,
            status: RunStatus::Suspended,
            step,
            pending: Some(pending),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_suspended(&self) -> bool {
        self.status == RunStatus::Suspended
    }
}

/// Progress reported by [`Engine::stream`], in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A node finished and its checkpoint is durable
    NodeCompleted {
        step: StepIndex,
        node: String,
        delta: State,
    },
    /// The run stopped at a review gate
    Suspended { step: StepIndex, pending: PendingReview },
    /// The router returned `END`
    Completed { step: StepIndex, state: State },
}

/// Events of one streaming invocation. A failure is yielded as the last item.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ExecutionEvent>> + Send>>;

/// Where a thread stands between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThreadStatus {
    /// No checkpoints yet
    Empty,
    /// Ready for the next `invoke`
    Idle { step: StepIndex, node: String },
    /// Waiting for `resume`
    Suspended { pending: PendingReview },
}

#[derive(Debug)]
enum RunStart {
    Input(State),
    Resolution(Resolution),
    /// Pick up wherever the newest checkpoint routes to
    Continue,
}

type EventSender = mpsc::Sender<Result<ExecutionEvent>>;

/// Compiled graph bound to a checkpoint store.
///
/// Cheap to clone; clones share the graph, the store and the per-thread locks.
#[derive(Clone)]
pub struct Engine {
    graph: Arc<Graph>,
    store: Arc<dyn CheckpointStore>,
    config: EngineConfig,
    locks: ThreadLocks,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("graph", &self.graph)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(graph: Arc<Graph>, store: Arc<dyn CheckpointStore>, config: EngineConfig) -> Self {
        Self {
            graph,
            store,
            config,
            locks: ThreadLocks::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn store(&self) -> Arc<dyn CheckpointStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn inspector(&self) -> Inspector {
        Inspector::new(Arc::clone(&self.graph), Arc::clone(&self.store))
    }

    /// Merge `input` into the thread and run from the entry node.
    ///
    /// Fails with [`GraphError::ThreadSuspended`] while the thread waits for review.
    pub async fn invoke(&self, thread_id: &str, input: State) -> Result<RunOutcome> {
        self.invoke_with_cancel(thread_id, input, CancellationToken::new())
            .await
    }

    #[tracing::instrument(skip(self, input, cancel), fields(input_fields = input.as_map().len()))]
    pub async fn invoke_with_cancel(
        &self,
        thread_id: &str,
        input: State,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        tracing::info!("Starting invocation");
        self.run(thread_id, RunStart::Input(input), &cancel, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Invocation failed");
                e
            })
    }

    /// Record `resolution` for the pending review and continue the run.
    ///
    /// Fails with [`GraphError::NotSuspended`] unless the thread waits at a gate.
    pub async fn resume(&self, thread_id: &str, resolution: Resolution) -> Result<RunOutcome> {
        self.resume_with_cancel(thread_id, resolution, CancellationToken::new())
            .await
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn resume_with_cancel(
        &self,
        thread_id: &str,
        resolution: Resolution,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        tracing::info!("Resuming thread");
        self.run(thread_id, RunStart::Resolution(resolution), &cancel, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Resume failed");
                e
            })
    }

    /// Fork `thread_id` at `step` into `new_thread_id` and run the fork onward.
    ///
    /// With deterministic nodes the fork reaches the same state the source did.
    #[tracing::instrument(skip(self))]
    pub async fn replay_from(
        &self,
        thread_id: &str,
        step: StepIndex,
        new_thread_id: &str,
    ) -> Result<RunOutcome> {
        self.inspector().fork(thread_id, step, new_thread_id).await?;
        self.run(new_thread_id, RunStart::Continue, &CancellationToken::new(), None)
            .await
    }

    /// Streaming `invoke`. Must be called from within a tokio runtime.
    pub fn stream(&self, thread_id: impl Into<String>, input: State) -> EventStream {
        self.spawn_stream(thread_id.into(), RunStart::Input(input), CancellationToken::new())
    }

    pub fn stream_with_cancel(
        &self,
        thread_id: impl Into<String>,
        input: State,
        cancel: CancellationToken,
    ) -> EventStream {
        self.spawn_stream(thread_id.into(), RunStart::Input(input), cancel)
    }

    /// Streaming `resume`.
    pub fn stream_resume(&self, thread_id: impl Into<String>, resolution: Resolution) -> EventStream {
        self.spawn_stream(
            thread_id.into(),
            RunStart::Resolution(resolution),
            CancellationToken::new(),
        )
    }

    fn spawn_stream(&self, thread_id: String, start: RunStart, cancel: CancellationToken) -> EventStream {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let engine = self.clone();

        tokio::spawn(async move {
            if let Err(e) = engine.run(&thread_id, start, &cancel, Some(&tx)).await {
                tracing::error!(thread_id = %thread_id, error = %e, "Streaming run failed");
                let _ = tx.send(Err(e)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    pub async fn status(&self, thread_id: &str) -> Result<ThreadStatus> {
        let latest = self
            .store
            .latest(thread_id)
            .await
            .map_err(|e| GraphError::storage(thread_id, None, e))?;

        Ok(match latest {
            None => ThreadStatus::Empty,
            Some(cp) => match self.graph.suspended_gate(&cp.node, &cp.state) {
                Some(gate) => ThreadStatus::Suspended {
                    pending: PendingReview::from_state(gate, cp.step, &cp.state),
                },
                None => ThreadStatus::Idle {
                    step: cp.step,
                    node: cp.node,
                },
            },
        })
    }

    async fn run(
        &self,
        thread_id: &str,
        start: RunStart,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<RunOutcome> {
        let _guard = self.locks.lock(thread_id).await;
        let graph = self.graph.as_ref();
        let schema = graph.schema();

        let latest = self
            .store
            .latest(thread_id)
            .await
            .map_err(|e| GraphError::storage(thread_id, None, e))?;
        let mut committed = latest.as_ref().map(|cp| cp.step);
        let mut staged: Vec<PendingCheckpoint> = Vec::new();

        let (mut state, mut current) = match start {
            RunStart::Input(input) => {
                // review fields only ever come from `resume` and the gate itself
                if let Some(field) = [APPROVAL_FIELD, REVIEW_FIELD]
                    .into_iter()
                    .find(|field| input.get(field).is_some())
                {
                    return Err(GraphError::InvalidInput {
                        thread_id: thread_id.to_string(),
                        step: next_step(committed, 0),
                        source: StateError::ReservedField(field.to_string()),
                    });
                }

                if let Some(cp) = &latest {
                    if let Some(gate) = graph.suspended_gate(&cp.node, &cp.state) {
                        return Err(GraphError::ThreadSuspended {
                            thread_id: thread_id.to_string(),
                            step: cp.step,
                            gate,
                        });
                    }
                }

                let base = latest.map(|cp| cp.state).unwrap_or_default();
                let state = schema.merged(&base, &input).map_err(|source| {
                    GraphError::InvalidInput {
                        thread_id: thread_id.to_string(),
                        step: next_step(committed, 0),
                        source,
                    }
                })?;

                if committed.is_none() || !input.is_empty() || graph.registry().is_gate(graph.entry()) {
                    staged.push(PendingCheckpoint::new(INPUT_NODE, state.clone()));
                }
                (state, NextNode::node(graph.entry()))
            }
            RunStart::Resolution(resolution) => {
                let cp = latest.ok_or_else(|| GraphError::NotSuspended {
                    thread_id: thread_id.to_string(),
                    step: None,
                })?;
                let gate = graph.suspended_gate(&cp.node, &cp.state).ok_or_else(|| {
                    GraphError::NotSuspended {
                        thread_id: thread_id.to_string(),
                        step: Some(cp.step),
                    }
                })?;

                tracing::info!(%resolution, gate = %gate, step = cp.step, "Applying resolution");
                let state = schema
                    .merged(&cp.state, &resolution.to_update())
                    .map_err(|source| GraphError::InvalidInput {
                        thread_id: thread_id.to_string(),
                        step: cp.step + 1,
                        source,
                    })?;
                (state, NextNode::Node(gate))
            }
            RunStart::Continue => {
                let cp = latest.ok_or_else(|| GraphError::CheckpointNotFound {
                    thread_id: thread_id.to_string(),
                    step: 0,
                })?;
                let next = graph.next_after(&cp.node, &cp.state);
                (cp.state, next)
            }
        };

        let mut executions = 0usize;
        loop {
            let node = match current {
                NextNode::End => {
                    self.flush(thread_id, &mut staged, &mut committed).await?;
                    let step = committed.unwrap_or_default();
                    tracing::info!(thread_id, step, executions, "Run completed");
                    emit(
                        events,
                        ExecutionEvent::Completed {
                            step,
                            state: state.clone(),
                        },
                    )
                    .await;
                    return Ok(RunOutcome::completed(state, step));
                }
                NextNode::Node(node) => node,
            };

            if graph.registry().is_gate(&node) && !state.is_set(APPROVAL_FIELD) {
                self.flush(thread_id, &mut staged, &mut committed).await?;
                let step = committed.unwrap_or_default();
                let pending = PendingReview::from_state(&node, step, &state);
                tracing::info!(thread_id, step, gate = %node, "Suspended for review");
                emit(
                    events,
                    ExecutionEvent::Suspended {
                        step,
                        pending: pending.clone(),
                    },
                )
                .await;
                return Ok(RunOutcome::suspended(state, step, pending));
            }

            let step = next_step(committed, staged.len());
            if executions >= self.config.max_steps {
                return Err(GraphError::StepLimitExceeded {
                    thread_id: thread_id.to_string(),
                    step,
                    limit: self.config.max_steps,
                });
            }
            executions += 1;

            tracing::debug!(thread_id, step, node = %node, "Executing node");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = graph.registry().invoke(&node, state.clone()) => Some(result),
            };

            let delta = match result {
                None => {
                    tracing::warn!(thread_id, step, node = %node, "Node cancelled");
                    return Err(GraphError::Cancelled {
                        thread_id: thread_id.to_string(),
                        step,
                        node,
                    });
                }
                Some(Err(InvokeError::UnknownNode(node))) => {
                    return Err(GraphError::UnknownNode {
                        thread_id: thread_id.to_string(),
                        step,
                        node,
                    });
                }
                Some(Err(InvokeError::Failed { node, cause })) => {
                    return Err(GraphError::node_execution(thread_id, step, node, cause));
                }
                Some(Ok(delta)) => delta,
            };

            state = schema
                .merged(&state, &delta)
                .map_err(|e| GraphError::node_execution(thread_id, step, &node, e))?;

            staged.push(PendingCheckpoint::new(node.clone(), state.clone()));
            self.flush(thread_id, &mut staged, &mut committed).await?;
            let step = committed.unwrap_or(step);

            emit(
                events,
                ExecutionEvent::NodeCompleted {
                    step,
                    node: node.clone(),
                    delta,
                },
            )
            .await;

            current = graph.next_after(&node, &state);
            tracing::debug!(thread_id, step, from = %node, to = %current, "Routed");
        }
    }

    /// Commit every staged checkpoint as one atomic append.
    async fn flush(
        &self,
        thread_id: &str,
        staged: &mut Vec<PendingCheckpoint>,
        committed: &mut Option<StepIndex>,
    ) -> Result<()> {
        if staged.is_empty() {
            return Ok(());
        }

        let writes = std::mem::take(staged);
        let first = next_step(*committed, 0);
        let steps = self
            .store
            .append_all(thread_id, *committed, writes)
            .await
            .map_err(|e| GraphError::storage(thread_id, Some(first), e))?;

        if let Some(last) = steps.last() {
            *committed = Some(*last);
        }
        Ok(())
    }
}

fn next_step(committed: Option<StepIndex>, staged: usize) -> StepIndex {
    committed.map_or(0, |step| step + 1) + staged as StepIndex
}

async fn emit(events: Option<&EventSender>, event: ExecutionEvent) {
    if let Some(tx) = events {
        if tx.send(Ok(event)).await.is_err() {
            tracing::debug!("Event receiver dropped");
        }
    }
}
