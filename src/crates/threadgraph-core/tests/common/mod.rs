//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use threadgraph_checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, CheckpointStream, HistoryQuery,
    InMemoryCheckpointStore, PendingCheckpoint, StepIndex,
};
use threadgraph_core::{
    messages_update, ChatModel, Message, MessageRole, ModelError, State, Tool, ToolCall,
    ToolDefinition, ToolRegistry,
};

pub const POPULATION: &str = "Turkey population (2024): 85.3 million";

/// Deterministic model: asks to search for population questions, summarizes
/// tool results, answers everything else directly.
#[derive(Debug, Default)]
pub struct ResearchModel {
    calls: AtomicUsize,
}

impl ResearchModel {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ResearchModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(last) = messages.last() else {
            return Ok(Message::assistant("Hello!"));
        };

        let can_search = tools.iter().any(|t| t.name == "search");
        Ok(match last.role {
            MessageRole::Tool => Message::assistant(format!("According to my search: {}", last.content)),
            MessageRole::Human if can_search && last.content.to_lowercase().contains("population") => {
                Message::assistant("").with_tool_calls(vec![ToolCall::new(
                    format!("call_{}", messages.len()),
                    "search",
                    json!({"query": "Turkey population"}),
                )])
            }
            MessageRole::Human => Message::assistant(format!("You said: {}", last.content)),
            _ => Message::assistant("I'll answer from what I already know."),
        })
    }
}

/// Plays back queued replies, then falls back to [`ResearchModel`].
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Message, ModelError>>>,
    fallback: ResearchModel,
}

impl ScriptedModel {
    pub fn new(script: impl IntoIterator<Item = Result<Message, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: ResearchModel::default(),
        }
    }

    pub fn push(&self, reply: Result<Message, ModelError>) {
        self.script.lock().push_back(reply);
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, ModelError> {
        let next = self.script.lock().pop_front();
        match next {
            Some(reply) => reply,
            None => self.fallback.complete(messages, tools).await,
        }
    }
}

/// Requests the search tool on every turn.
#[derive(Debug, Default)]
pub struct LoopingModel;

#[async_trait]
impl ChatModel for LoopingModel {
    async fn complete(&self, messages: &[Message], _: &[ToolDefinition]) -> Result<Message, ModelError> {
        Ok(Message::assistant("").with_tool_calls(vec![ToolCall::new(
            format!("call_{}", messages.len()),
            "search",
            json!({"query": "again"}),
        )]))
    }
}

/// [`ResearchModel`] behind a fixed delay.
#[derive(Debug, Default)]
pub struct SlowModel {
    delay: Duration,
    inner: ResearchModel,
}

impl SlowModel {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: ResearchModel::default(),
        }
    }
}

#[async_trait]
impl ChatModel for SlowModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, ModelError> {
        tokio::time::sleep(self.delay).await;
        self.inner.complete(messages, tools).await
    }
}

/// Never answers within a test's lifetime.
#[derive(Debug, Default)]
pub struct StalledModel;

#[async_trait]
impl ChatModel for StalledModel {
    async fn complete(&self, _: &[Message], _: &[ToolDefinition]) -> Result<Message, ModelError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Message::assistant("too late"))
    }
}

pub fn search_tools() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::new().with_tool(Tool::from_fn(
        "search",
        "Search the web for current information",
        json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        }),
        |_args| async { Ok(json!(POPULATION)) },
    )))
}

pub fn human(text: &str) -> State {
    messages_update(vec![Message::human(text)]).unwrap()
}

/// In-memory store whose writes can be switched off.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: InMemoryCheckpointStore,
    fail_writes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn append_all(
        &self,
        thread_id: &str,
        parent: Option<StepIndex>,
        writes: Vec<PendingCheckpoint>,
    ) -> threadgraph_checkpoint::Result<Vec<StepIndex>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CheckpointError::Storage("disk unavailable".to_string()));
        }
        self.inner.append_all(thread_id, parent, writes).await
    }

    async fn latest(&self, thread_id: &str) -> threadgraph_checkpoint::Result<Option<Checkpoint>> {
        self.inner.latest(thread_id).await
    }

    async fn get(&self, thread_id: &str, step: StepIndex) -> threadgraph_checkpoint::Result<Checkpoint> {
        self.inner.get(thread_id, step).await
    }

    async fn list(
        &self,
        thread_id: &str,
        query: HistoryQuery,
    ) -> threadgraph_checkpoint::Result<CheckpointStream> {
        self.inner.list(thread_id, query).await
    }

    async fn fork(
        &self,
        thread_id: &str,
        step: StepIndex,
        new_thread_id: &str,
    ) -> threadgraph_checkpoint::Result<Vec<Checkpoint>> {
        self.inner.fork(thread_id, step, new_thread_id).await
    }

    async fn threads(&self) -> threadgraph_checkpoint::Result<Vec<String>> {
        self.inner.threads().await
    }
}

/// Full history, oldest first.
pub async fn history(store: &dyn CheckpointStore, thread_id: &str) -> Vec<Checkpoint> {
    let mut checkpoints: Vec<Checkpoint> = store
        .history(thread_id)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    checkpoints.reverse();
    checkpoints
}

pub async fn nodes(store: &dyn CheckpointStore, thread_id: &str) -> Vec<String> {
    history(store, thread_id)
        .await
        .into_iter()
        .map(|c| c.node)
        .collect()
}
