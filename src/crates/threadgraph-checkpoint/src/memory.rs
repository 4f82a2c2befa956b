//! In-memory checkpoint store
//!
//! Keeps every thread's log in process memory. Suitable for tests and for
//! short-lived sessions; nothing survives a restart.
//!
//! The outer map is only write-locked to create a thread's log. Each log has
//! its own mutex, so appends to one thread never wait on another thread.

use crate::{
    checkpoint::{Checkpoint, HistoryQuery, PendingCheckpoint, StepIndex},
    error::{CheckpointError, Result},
    store::{CheckpointStore, CheckpointStream},
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type ThreadLog = Arc<Mutex<Vec<Checkpoint>>>;

type CheckpointStorage = Arc<RwLock<HashMap<String, ThreadLog>>>;

/// Process-local [`CheckpointStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint.
    pub async fn thread_count(&self) -> usize {
        self.non_empty_threads().await.len()
    }

    /// Total number of checkpoints across all threads.
    pub async fn checkpoint_count(&self) -> usize {
        let logs: Vec<ThreadLog> = self.storage.read().await.values().cloned().collect();
        let mut total = 0;
        for log in logs {
            total += log.lock().await.len();
        }
        total
    }

    async fn log(&self, thread_id: &str) -> Option<ThreadLog> {
        self.storage.read().await.get(thread_id).cloned()
    }

    async fn log_or_create(&self, thread_id: &str) -> ThreadLog {
        if let Some(log) = self.log(thread_id).await {
            return log;
        }
        self.storage
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    async fn non_empty_threads(&self) -> Vec<String> {
        let logs: Vec<(String, ThreadLog)> = self
            .storage
            .read()
            .await
            .iter()
            .map(|(id, log)| (id.clone(), log.clone()))
            .collect();

        let mut threads = Vec::with_capacity(logs.len());
        for (thread_id, log) in logs {
            if !log.lock().await.is_empty() {
                threads.push(thread_id);
            }
        }
        threads.sort();
        threads
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn append_all(
        &self,
        thread_id: &str,
        parent: Option<StepIndex>,
        writes: Vec<PendingCheckpoint>,
    ) -> Result<Vec<StepIndex>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let log = self.log_or_create(thread_id).await;
        let mut entries = log.lock().await;
        let base = entries.len() as StepIndex;
        if base != parent.map_or(0, |p| p + 1) {
            return Err(CheckpointError::conflict(thread_id, parent, base.checked_sub(1)));
        }
        let created_at = Utc::now();

        let mut steps = Vec::with_capacity(writes.len());
        for (offset, write) in writes.into_iter().enumerate() {
            let step = base + offset as StepIndex;
            entries.push(Checkpoint {
                thread_id: thread_id.to_string(),
                step,
                node: write.node,
                state: write.state,
                created_at,
            });
            steps.push(step);
        }

        tracing::debug!(thread_id, ?steps, "Appended checkpoints");
        Ok(steps)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let Some(log) = self.log(thread_id).await else {
            return Ok(None);
        };
        let entries = log.lock().await;
        Ok(entries.last().cloned())
    }

    async fn get(&self, thread_id: &str, step: StepIndex) -> Result<Checkpoint> {
        let Some(log) = self.log(thread_id).await else {
            return Err(CheckpointError::not_found(thread_id, step));
        };
        let entries = log.lock().await;
        usize::try_from(step)
            .ok()
            .and_then(|index| entries.get(index))
            .cloned()
            .ok_or_else(|| CheckpointError::not_found(thread_id, step))
    }

    async fn list(&self, thread_id: &str, query: HistoryQuery) -> Result<CheckpointStream> {
        let results: Vec<Result<Checkpoint>> = match self.log(thread_id).await {
            Some(log) => {
                let entries = log.lock().await;
                entries
                    .iter()
                    .rev()
                    .filter(|checkpoint| query.matches(checkpoint))
                    .take(query.limit.unwrap_or(usize::MAX))
                    .cloned()
                    .map(Ok)
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(Box::pin(stream::iter(results)))
    }

    async fn fork(
        &self,
        thread_id: &str,
        step: StepIndex,
        new_thread_id: &str,
    ) -> Result<Vec<Checkpoint>> {
        let source = self
            .log(thread_id)
            .await
            .ok_or_else(|| CheckpointError::not_found(thread_id, step))?;

        let prefix: Vec<Checkpoint> = {
            let entries = source.lock().await;
            let end = usize::try_from(step)
                .ok()
                .filter(|index| *index < entries.len())
                .ok_or_else(|| CheckpointError::not_found(thread_id, step))?;
            entries[..=end]
                .iter()
                .map(|checkpoint| checkpoint.rehome(new_thread_id))
                .collect()
        };

        let target = self.log_or_create(new_thread_id).await;
        let mut entries = target.lock().await;
        if !entries.is_empty() {
            return Err(CheckpointError::ThreadExists(new_thread_id.to_string()));
        }
        entries.extend(prefix.iter().cloned());

        tracing::debug!(thread_id, step, new_thread_id, "Forked thread");
        Ok(prefix)
    }

    async fn threads(&self) -> Result<Vec<String>> {
        Ok(self.non_empty_threads().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;
    use futures::StreamExt;
    use serde_json::json;

    fn state(text: &str) -> State {
        State::new().with("messages", json!([{"role": "human", "content": text}]))
    }

    async fn steps_of(store: &InMemoryCheckpointStore, thread_id: &str) -> Vec<StepIndex> {
        let stream = store.history(thread_id).await.unwrap();
        stream.map(|c| c.unwrap().step).collect().await
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_steps() {
        let store = InMemoryCheckpointStore::new();
        assert_eq!(store.append("t1", "__input__", &state("a")).await.unwrap(), 0);
        assert_eq!(store.append("t1", "chatbot", &state("b")).await.unwrap(), 1);
        assert_eq!(store.append("t2", "__input__", &state("c")).await.unwrap(), 0);

        assert_eq!(steps_of(&store, "t1").await, vec![1, 0]);
        assert_eq!(store.thread_count().await, 2);
        assert_eq!(store.checkpoint_count().await, 3);
    }

    #[tokio::test]
    async fn test_append_all_is_one_unit() {
        let store = InMemoryCheckpointStore::new();
        let steps = store
            .append_all(
                "t1",
                None,
                vec![
                    PendingCheckpoint::new("__input__", state("a")),
                    PendingCheckpoint::new("chatbot", state("b")),
                ],
            )
            .await
            .unwrap();
        assert_eq!(steps, vec![0, 1]);
        assert!(store.append_all("t1", Some(1), Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_parent_is_rejected() {
        let store = InMemoryCheckpointStore::new();
        store.append("t1", "__input__", &state("a")).await.unwrap();
        store.append("t1", "chatbot", &state("b")).await.unwrap();

        let err = store
            .append_all("t1", Some(0), vec![PendingCheckpoint::new("chatbot", state("c"))])
            .await
            .unwrap_err();
        match err {
            CheckpointError::Conflict { expected, actual, .. } => {
                assert_eq!((expected, actual), (Some(0), Some(1)));
            }
            other => panic!("expected Conflict, got {:?}", other),
        }
        assert!(store
            .append_all("t2", Some(0), vec![PendingCheckpoint::new("__input__", state("a"))])
            .await
            .unwrap_err()
            .is_conflict());
        assert_eq!(store.checkpoint_count().await, 2);
    }

    #[tokio::test]
    async fn test_latest_and_get() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.latest("missing").await.unwrap().is_none());

        store.append("t1", "__input__", &state("a")).await.unwrap();
        store.append("t1", "chatbot", &state("b")).await.unwrap();

        let latest = store.latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.step, 1);
        assert_eq!(latest.node, "chatbot");

        let first = store.get("t1", 0).await.unwrap();
        assert_eq!(first.node, "__input__");

        let err = store.get("t1", 5).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_applies_query() {
        let store = InMemoryCheckpointStore::new();
        for node in ["__input__", "chatbot", "tools", "chatbot"] {
            store.append("t1", node, &state(node)).await.unwrap();
        }

        let chatbot: Vec<_> = store
            .list("t1", HistoryQuery::new().node("chatbot"))
            .await
            .unwrap()
            .map(|c| c.unwrap().step)
            .collect()
            .await;
        assert_eq!(chatbot, vec![3, 1]);

        let page: Vec<_> = store
            .list("t1", HistoryQuery::new().before(3).limit(2))
            .await
            .unwrap()
            .map(|c| c.unwrap().step)
            .collect()
            .await;
        assert_eq!(page, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_history_is_restartable() {
        let store = InMemoryCheckpointStore::new();
        store.append("t1", "__input__", &state("a")).await.unwrap();
        store.append("t1", "chatbot", &state("b")).await.unwrap();

        assert_eq!(steps_of(&store, "t1").await, steps_of(&store, "t1").await);
    }

    #[tokio::test]
    async fn test_fork_copies_prefix() {
        let store = InMemoryCheckpointStore::new();
        for node in ["__input__", "chatbot", "tools", "chatbot"] {
            store.append("t1", node, &state(node)).await.unwrap();
        }

        let copied = store.fork("t1", 1, "t1-fork").await.unwrap();
        assert_eq!(copied.len(), 2);
        assert!(copied.iter().all(|c| c.thread_id == "t1-fork"));

        assert_eq!(steps_of(&store, "t1-fork").await, vec![1, 0]);
        assert_eq!(steps_of(&store, "t1").await, vec![3, 2, 1, 0]);

        let next = store.append("t1-fork", "tools", &state("x")).await.unwrap();
        assert_eq!(next, 2);
        assert_eq!(store.get("t1", 2).await.unwrap().state, state("tools"));
    }

    #[tokio::test]
    async fn test_fork_rejects_bad_targets() {
        let store = InMemoryCheckpointStore::new();
        store.append("t1", "__input__", &state("a")).await.unwrap();
        store.append("t2", "__input__", &state("b")).await.unwrap();

        assert!(store.fork("t1", 4, "t3").await.unwrap_err().is_not_found());
        assert!(store.fork("nope", 0, "t3").await.unwrap_err().is_not_found());
        assert!(matches!(
            store.fork("t1", 0, "t2").await.unwrap_err(),
            CheckpointError::ThreadExists(id) if id == "t2"
        ));
        assert!(matches!(
            store.fork("t1", 0, "t1").await.unwrap_err(),
            CheckpointError::ThreadExists(_)
        ));
    }

    #[tokio::test]
    async fn test_threads_skips_empty_logs() {
        let store = InMemoryCheckpointStore::new();
        store.append("b", "__input__", &state("a")).await.unwrap();
        store.append("a", "__input__", &state("a")).await.unwrap();
        let _ = store.fork("a", 9, "c").await;

        assert_eq!(store.threads().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_gapless() {
        let store = InMemoryCheckpointStore::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let thread = if i % 2 == 0 { "even" } else { "odd" };
                store.append(thread, "node", &state("x")).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut even = steps_of(&store, "even").await;
        even.reverse();
        assert_eq!(even, (0..16).collect::<Vec<_>>());
    }
}
